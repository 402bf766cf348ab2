use std::path::Path;

use anyhow::Result;

use markbot_corpus::history::collect_history;
use markbot_corpus::{CorpusEngine, CorpusError, GenerateOptions, RegenReport};

use crate::history_file::JsonlHistory;

pub(crate) async fn run_regen(engine: &CorpusEngine) -> Result<()> {
    let report = engine.regenerate().await?;
    print_report(&report);
    Ok(())
}

pub(crate) async fn run_generate(
    engine: &CorpusEngine,
    min_score: Option<u64>,
    max_tries: Option<usize>,
    debug: bool,
) -> Result<()> {
    let mut options = GenerateOptions::from(engine.config());
    if let Some(min_score) = min_score {
        options.min_score = min_score;
    }
    if let Some(max_tries) = max_tries.filter(|&n| n > 0) {
        options.max_tries = max_tries;
    }

    match engine.respond(options).await {
        Ok(reply) => {
            println!("{}", reply.result.text);
            if let Some(attachment) = &reply.attachment {
                println!("attachment: {}", attachment.uri);
            }
            if debug {
                println!("{}", serde_json::to_string_pretty(&reply.result)?);
            }
            Ok(())
        }
        Err(err @ CorpusError::CorpusInsufficient { .. }) => {
            println!("Not enough chat data for a response.");
            if debug {
                println!("ERROR: {err}");
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn run_import(engine: &CorpusEngine, path: &Path) -> Result<()> {
    let history = JsonlHistory::load(path)?;
    let records = collect_history(&history, "import").await?;
    println!("importing {} human authored messages", records.len());
    engine.ingest(records).await;
    run_regen(engine).await
}

pub(crate) async fn run_train(engine: &CorpusEngine, path: &Path, channel: &str) -> Result<()> {
    let history = JsonlHistory::load(path)?;
    let report = engine.train(&history, channel).await?;
    println!("Finished training from past {} messages.", report.fetched);
    print_report(&report.regen);
    Ok(())
}

pub(crate) async fn run_delete(engine: &CorpusEngine, ids: Vec<String>) -> Result<()> {
    for id in ids {
        engine.mark_deleted(id).await;
    }
    run_regen(engine).await
}

fn print_report(report: &RegenReport) {
    println!("── corpus ───────────────────────────────────────────");
    println!("  records     : {}", report.records);
    println!("  added       : {}", report.added);
    println!("  deleted     : {}", report.deleted);
    println!("  states      : {}", report.states);
    println!("  transitions : {}", report.transitions);
}
