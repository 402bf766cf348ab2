use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ── Corpus config ─────────────────────────────────────────────────────────────

/// Chain model and generation settings.
///
/// | Key          | Effect                                                        |
/// |--------------|---------------------------------------------------------------|
/// | `state_size` | Number of tokens forming one chain state (the chain order).   |
/// | `min_score`  | Minimum score a generated sentence must reach to be returned. |
/// | `max_tries`  | Generation attempts before giving up on the threshold.        |
/// | `max_tokens` | Hard cap on the length of a single random walk.               |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub state_size: usize,
    pub min_score: u64,
    pub max_tries: usize,
    pub max_tokens: usize,
    /// Directory holding both persisted artifacts.  See [`DATA_DIR_ENV`].
    pub data_dir: String,
    /// File name of the raw message store inside `data_dir`.
    pub records_file: String,
    /// File name of the derived chain model inside `data_dir`.
    pub model_file: String,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            state_size: 2,
            min_score: 20,
            max_tries: 2000,
            max_tokens: 64,
            data_dir: "config".to_string(),
            records_file: "markovDB.json".to_string(),
            model_file: "markov.json".to_string(),
        }
    }
}

impl CorpusConfig {
    pub fn records_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.records_file)
    }

    pub fn model_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.model_file)
    }
}

// ── Schedule config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Regenerate the corpus once a day while `serve` is running.
    pub nightly_regen: bool,
    /// Local hour (0–23) at which the nightly regeneration fires.
    pub regen_hour: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            nightly_regen: true,
            regen_hour: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub corpus: CorpusConfig,
    pub schedule: ScheduleConfig,
    pub telemetry: TelemetryConfig,
}

/// Environment variable that overrides `corpus.data_dir`.
pub const DATA_DIR_ENV: &str = "MARKBOT_DATA_DIR";

/// Result of [`AppConfig::load_from`]: the configuration plus the dotted
/// names of keys whose values were rejected and replaced by defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub replaced: Vec<String>,
}

impl AppConfig {
    /// Read `path`, falling back to defaults key by key.
    ///
    /// A missing file yields the defaults.  A file that is not TOML at all is
    /// an error.  A key with the wrong type or an out-of-range value only
    /// loses that key.
    pub fn load_from(path: impl AsRef<Path>) -> Result<LoadedConfig> {
        let Ok(raw) = fs::read_to_string(path) else {
            return Ok(LoadedConfig {
                config: Self::default(),
                replaced: Vec::new(),
            });
        };
        let table: toml::Table = toml::from_str(&raw)?;

        let mut replaced = Vec::new();
        let mut config = Self {
            corpus: section(&table, "corpus", &mut replaced),
            schedule: section(&table, "schedule", &mut replaced),
            telemetry: section(&table, "telemetry", &mut replaced),
        };
        replaced.extend(config.sanitize());

        Ok(LoadedConfig { config, replaced })
    }

    /// Point the corpus at `value` when it is set and non-empty.
    pub fn with_data_dir_override(mut self, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.corpus.data_dir = value;
        }
        self
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Replace out-of-range values with their defaults and return the keys
    /// that were touched.  A bad value never prevents startup.
    fn sanitize(&mut self) -> Vec<String> {
        let corpus = CorpusConfig::default();
        let mut replaced = Vec::new();
        let mut reset = |key: &str| replaced.push(key.to_string());

        if self.corpus.state_size == 0 {
            self.corpus.state_size = corpus.state_size;
            reset("corpus.state_size");
        }
        if self.corpus.max_tries == 0 {
            self.corpus.max_tries = corpus.max_tries;
            reset("corpus.max_tries");
        }
        if self.corpus.max_tokens == 0 {
            self.corpus.max_tokens = corpus.max_tokens;
            reset("corpus.max_tokens");
        }
        if self.corpus.data_dir.trim().is_empty() {
            self.corpus.data_dir = corpus.data_dir;
            reset("corpus.data_dir");
        }
        if self.corpus.records_file.trim().is_empty() {
            self.corpus.records_file = corpus.records_file;
            reset("corpus.records_file");
        }
        if self.corpus.model_file.trim().is_empty() {
            self.corpus.model_file = corpus.model_file;
            reset("corpus.model_file");
        }
        if self.schedule.regen_hour > 23 {
            self.schedule.regen_hour = ScheduleConfig::default().regen_hour;
            reset("schedule.regen_hour");
        }
        replaced
    }
}

/// Deserialize one `[name]` section, dropping every key that does not
/// deserialize on its own so the remaining keys survive.
fn section<T>(table: &toml::Table, name: &str, replaced: &mut Vec<String>) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(value) = table.get(name) else {
        return T::default();
    };
    let Some(keys) = value.as_table() else {
        replaced.push(name.to_string());
        return T::default();
    };

    let mut valid = toml::Table::new();
    for (key, value) in keys {
        let mut single = toml::Table::new();
        single.insert(key.clone(), value.clone());
        if toml::Value::Table(single).try_into::<T>().is_ok() {
            valid.insert(key.clone(), value.clone());
        } else {
            replaced.push(format!("{name}.{key}"));
        }
    }

    match toml::Value::Table(valid).try_into() {
        Ok(section) => section,
        Err(_) => {
            replaced.push(name.to_string());
            T::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
