//! Line-oriented chat host.
//!
//! Each stdin line is one JSON event from the chat platform; each reply is one
//! JSON line on stdout.  A background task regenerates the corpus once a day.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use markbot_config::AppConfig;
use markbot_corpus::{CorpusEngine, CorpusError, GenerateOptions, GenerationResult, HistoryItem, RegenReport};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Message {
        #[serde(flatten)]
        item: HistoryItem,
        /// The message addresses the bot directly and expects an answer.
        #[serde(default)]
        mentions_bot: bool,
    },
    Delete {
        id: String,
    },
    Generate {
        #[serde(default)]
        debug: bool,
    },
    Regen,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound {
    Reply {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        attachment: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<GenerationResult>,
    },
    Regenerated {
        report: RegenReport,
    },
    Info {
        message: String,
    },
}

pub(crate) async fn run_serve(engine: CorpusEngine, config: &AppConfig) -> Result<()> {
    let engine = Arc::new(engine);
    let (shutdown_tx, _) = watch::channel(false);

    if config.schedule.nightly_regen {
        spawn_nightly_regen(Arc::clone(&engine), config.schedule.regen_hour, &shutdown_tx);
    }

    info!("listening for chat events on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<Inbound>(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "ignoring malformed chat event");
                continue;
            }
        };

        if let Some(reply) = handle_event(&engine, event).await {
            println!("{}", serde_json::to_string(&reply)?);
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn handle_event(engine: &CorpusEngine, event: Inbound) -> Option<Outbound> {
    match event {
        Inbound::Message { item, mentions_bot } => {
            debug!(id = %item.id, "listening");
            let record = item.into_record()?;
            engine.ingest([record]).await;
            if mentions_bot {
                Some(respond(engine, false).await)
            } else {
                None
            }
        }
        Inbound::Delete { id } => {
            engine.mark_deleted(id).await;
            None
        }
        Inbound::Generate { debug } => Some(respond(engine, debug).await),
        Inbound::Regen => Some(match engine.regenerate().await {
            Ok(report) => Outbound::Regenerated { report },
            Err(err) => Outbound::Info {
                message: err.to_string(),
            },
        }),
    }
}

async fn respond(engine: &CorpusEngine, debug: bool) -> Outbound {
    info!("responding");
    match engine.respond(GenerateOptions::from(engine.config())).await {
        Ok(reply) => Outbound::Reply {
            text: reply.result.text.clone(),
            attachment: reply.attachment.map(|a| a.uri),
            debug: debug.then_some(reply.result),
        },
        Err(err @ CorpusError::CorpusInsufficient { .. }) => {
            info!("not enough chat data for a response");
            Outbound::Info {
                message: err.to_string(),
            }
        }
        Err(err) => Outbound::Info {
            message: err.to_string(),
        },
    }
}

/// Regenerate the corpus every day at `hour` local time until shutdown.
fn spawn_nightly_regen(engine: Arc<CorpusEngine>, hour: u8, shutdown_tx: &watch::Sender<bool>) {
    let mut rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        loop {
            let wait = until_next_hour(Local::now().naive_local(), hour);
            debug!(seconds = wait.as_secs(), "next scheduled regeneration");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match engine.regenerate().await {
                        Ok(report) => info!(records = report.records, "scheduled regeneration complete"),
                        Err(err) => warn!(error = %err, "scheduled regeneration failed"),
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

fn until_next_hour(now: NaiveDateTime, hour: u8) -> Duration {
    let fallback = Duration::from_secs(60 * 60);
    let Some(today) = now.date().and_hms_opt(u32::from(hour.min(23)), 0, 0) else {
        return fallback;
    };
    let target = if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    };
    (target - now).to_std().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use markbot_config::CorpusConfig;
    use markbot_corpus::CorpusEngine;

    use super::{Inbound, Outbound, handle_event, until_next_hour};

    fn at(h: u32, m: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn next_midnight_from_evening() {
        assert_eq!(until_next_hour(at(23, 30), 0), Duration::from_secs(30 * 60));
    }

    #[test]
    fn same_day_when_hour_is_ahead() {
        assert_eq!(until_next_hour(at(1, 0), 4), Duration::from_secs(3 * 60 * 60));
    }

    #[test]
    fn exactly_on_the_hour_waits_a_full_day() {
        assert_eq!(until_next_hour(at(4, 0), 4), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn inbound_message_parses_flattened_item() {
        let event: Inbound = serde_json::from_str(
            r#"{"type":"message","id":"7","text":"hi","attachments":["https://cdn/a.png"],"mentions_bot":true}"#,
        )
        .unwrap();
        match event {
            Inbound::Message { item, mentions_bot } => {
                assert_eq!(item.id, "7");
                assert_eq!(item.attachments.len(), 1);
                assert!(!item.is_automated);
                assert!(mentions_bot);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn messages_are_buffered_until_regen() {
        let dir = TempDir::new().unwrap();
        let engine = CorpusEngine::new(CorpusConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
            min_score: 0,
            ..CorpusConfig::default()
        });

        let quiet = Inbound::Message {
            item: serde_json::from_str(r#"{"id":"1","text":"we should get lunch today"}"#).unwrap(),
            mentions_bot: false,
        };
        assert!(handle_event(&engine, quiet).await.is_none());
        let bot = Inbound::Message {
            item: serde_json::from_str(r#"{"id":"2","text":"beep boop","is_automated":true}"#).unwrap(),
            mentions_bot: false,
        };
        assert!(handle_event(&engine, bot).await.is_none());
        assert_eq!(engine.pending().await.additions, 1);

        // Nothing is generated before the corpus is regenerated.
        assert!(matches!(
            handle_event(&engine, Inbound::Generate { debug: false }).await,
            Some(Outbound::Info { .. })
        ));

        assert!(matches!(
            handle_event(&engine, Inbound::Regen).await,
            Some(Outbound::Regenerated { .. })
        ));
        match handle_event(&engine, Inbound::Generate { debug: true }).await {
            Some(Outbound::Reply { text, debug, .. }) => {
                assert_eq!(text, "we should get lunch today");
                assert_eq!(debug.unwrap().refs[0].id, "1");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
