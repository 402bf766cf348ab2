//! Cursor-driven collection of a channel's message history.
//!
//! The platform hands out history newest-first, one page at a time; each
//! request names the oldest id seen so far as its `before` cursor.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::Record;

/// Largest page the platform returns per request.
pub const PAGE_SIZE: usize = 100;

/// One historical message as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Sent by a bot or other automated account.
    #[serde(default)]
    pub is_automated: bool,
}

impl HistoryItem {
    /// Corpus record for a human-authored message, keeping only its first
    /// attachment.  Automated messages yield `None`.
    pub fn into_record(self) -> Option<Record> {
        if self.is_automated {
            return None;
        }
        let mut record = Record::new(self.id, self.text);
        record.attachment = self.attachments.into_iter().next();
        Some(record)
    }
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` messages older than `before` (or the newest messages when
    /// `before` is `None`), newest first.
    async fn fetch_page(&self, channel: &str, before: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>>;
}

/// Walks a channel's history one page at a time.
///
/// The pager only remembers its cursor, so a failed fetch can be retried by
/// calling [`HistoryPager::next_page`] again.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    channel: String,
    cursor: Option<String>,
    exhausted: bool,
}

impl HistoryPager {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the history has run out.
    pub async fn next_page(&mut self, source: &dyn HistorySource) -> Result<Option<Vec<HistoryItem>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = source
            .fetch_page(&self.channel, self.cursor.as_deref(), PAGE_SIZE)
            .await?;

        match page.last() {
            Some(oldest) if page.len() >= PAGE_SIZE => {
                self.cursor = Some(oldest.id.clone());
            }
            _ => self.exhausted = true,
        }

        if page.is_empty() {
            return Ok(None);
        }
        Ok(Some(page))
    }
}

/// Fetch the whole history of `channel` and keep the human-authored messages.
pub async fn collect_history(source: &dyn HistorySource, channel: &str) -> Result<Vec<Record>> {
    let mut pager = HistoryPager::new(channel);
    let mut records = Vec::new();
    let mut batch = 0usize;

    while let Some(page) = pager.next_page(source).await? {
        debug!(batch, items = page.len(), "fetched history page");
        batch += 1;
        records.extend(page.into_iter().filter_map(HistoryItem::into_record));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::{HistoryItem, HistoryPager, HistorySource, collect_history};

    /// Serves `total` messages with ids `total..1`, newest first.
    struct FakeChannel {
        total: usize,
        requests: Mutex<Vec<Option<String>>>,
    }

    impl FakeChannel {
        fn new(total: usize) -> Self {
            Self {
                total,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HistorySource for FakeChannel {
        async fn fetch_page(&self, _channel: &str, before: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>> {
            self.requests.lock().unwrap().push(before.map(str::to_string));
            let newest = match before {
                Some(id) => id.parse::<usize>()? - 1,
                None => self.total,
            };
            Ok((1..=newest)
                .rev()
                .take(limit)
                .map(|n| HistoryItem {
                    id: n.to_string(),
                    text: format!("message {n}"),
                    attachments: if n % 10 == 0 {
                        vec![format!("https://cdn/{n}.png"), "https://cdn/ignored.png".to_string()]
                    } else {
                        vec![]
                    },
                    is_automated: n % 7 == 0,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn collects_all_pages_and_filters_bots() {
        let channel = FakeChannel::new(250);
        let records = collect_history(&channel, "general").await.unwrap();

        assert_eq!(records.len(), 250 - 250 / 7);
        assert!(records.iter().all(|r| r.id.parse::<usize>().unwrap() % 7 != 0));
        assert_eq!(records[0].id, "250");
        let tenth = records.iter().find(|r| r.id == "10").unwrap();
        assert_eq!(tenth.attachment.as_deref(), Some("https://cdn/10.png"));

        let requests = channel.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![None, Some("151".to_string()), Some("51".to_string())]
        );
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_ends_on_empty_page() {
        let channel = FakeChannel::new(200);
        let records = collect_history(&channel, "general").await.unwrap();
        assert_eq!(records.len(), 200 - 200 / 7);
        assert_eq!(channel.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_channel_yields_nothing() {
        let channel = FakeChannel::new(0);
        let records = collect_history(&channel, "general").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn pager_stops_asking_after_short_page() {
        let channel = FakeChannel::new(150);
        let mut pager = HistoryPager::new("general");

        let first = pager.next_page(&channel).await.unwrap().unwrap();
        assert_eq!(first.len(), 100);
        let second = pager.next_page(&channel).await.unwrap().unwrap();
        assert_eq!(second.first().map(|i| i.id.as_str()), Some("50"));
        assert!(pager.next_page(&channel).await.unwrap().is_none());

        let requests = channel.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![None, Some("51".to_string())]);
    }

    #[test]
    fn automated_item_has_no_record() {
        let item = HistoryItem {
            id: "1".to_string(),
            text: "beep".to_string(),
            attachments: vec![],
            is_automated: true,
        };
        assert!(item.into_record().is_none());
    }
}
