use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

use markbot_corpus::{HistoryItem, HistorySource};

/// Channel history exported as JSON lines, newest message first.
#[derive(Debug, Clone)]
pub(crate) struct JsonlHistory {
    items: Vec<HistoryItem>,
}

impl JsonlHistory {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut items = Vec::new();

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<HistoryItem>(&line) {
                Ok(item) => items.push(item),
                Err(err) => {
                    warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %path.display(),
                        "unreadable history line, skipping"
                    );
                }
            }
        }

        Ok(Self { items })
    }
}

#[async_trait]
impl HistorySource for JsonlHistory {
    async fn fetch_page(&self, _channel: &str, before: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>> {
        let start = match before {
            Some(id) => match self.items.iter().position(|item| item.id == id) {
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        Ok(self.items.iter().skip(start).take(limit).cloned().collect())
    }
}
