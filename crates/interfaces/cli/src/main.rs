mod corpus_cmds;
mod history_file;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use markbot_config::{AppConfig, DATA_DIR_ENV};
use markbot_corpus::CorpusEngine;

#[derive(Debug, Parser)]
#[command(
    name = "markbot",
    version,
    about = "A Markov chain chatbot that speaks based on previous chat input"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fold pending changes into the corpus and rebuild the chain model.
    Regen,
    /// Generate one sentence from the current chain model.
    Generate {
        #[arg(long)]
        min_score: Option<u64>,
        #[arg(long)]
        max_tries: Option<usize>,
        /// Print the full generation result as JSON after the sentence.
        #[arg(long)]
        debug: bool,
    },
    /// Add exported channel history (JSON lines, newest first) to the corpus.
    Import {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Wipe the corpus and rebuild it from exported channel history.
    Train {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[arg(long, default_value = "history")]
        channel: String,
    },
    /// Remove messages from the corpus by id.
    Delete {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,
    },
    /// Read chat events from stdin as JSON lines and answer on stdout.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (config, replaced, config_err) = match AppConfig::load_from(&cli.config) {
        Ok(loaded) => (loaded.config, loaded.replaced, None),
        Err(err) => (AppConfig::default(), Vec::new(), Some(err)),
    };
    let config = config.with_data_dir_override(std::env::var(DATA_DIR_ENV).ok());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(err) = config_err {
        warn!(path = %cli.config.display(), error = %err, "failed to read config, using defaults");
    }
    for key in &replaced {
        warn!(path = %cli.config.display(), key = %key, "invalid config value, using default");
    }

    let engine = CorpusEngine::open(config.corpus.clone()).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Regen => corpus_cmds::run_regen(&engine).await?,
        Commands::Generate {
            min_score,
            max_tries,
            debug,
        } => corpus_cmds::run_generate(&engine, min_score, max_tries, debug).await?,
        Commands::Import { path } => corpus_cmds::run_import(&engine, &path).await?,
        Commands::Train { path, channel } => corpus_cmds::run_train(&engine, &path, &channel).await?,
        Commands::Delete { ids } => corpus_cmds::run_delete(&engine, ids).await?,
        Commands::Serve => serve::run_serve(engine, &config).await?,
    }

    Ok(())
}
