//! Process-wide corpus state and the operations the command layer calls:
//! ingest, mark deleted, regenerate, generate.

use std::io::ErrorKind;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use markbot_config::CorpusConfig;

use crate::chain::ChainModel;
use crate::error::{CorpusError, StorageError};
use crate::generator::{self, GenerateOptions, GenerationResult, ResolvedAttachment};
use crate::history::{HistorySource, collect_history};
use crate::persistence::{ModelArtifact, RecordStoreFile};
use crate::reconcile::{PendingBuffers, PendingMark, reconcile};
use crate::schema::Record;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegenReport {
    pub records: usize,
    pub added: usize,
    pub deleted: usize,
    pub states: usize,
    pub transitions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainReport {
    /// Human-authored messages pulled from the channel history.
    pub fetched: usize,
    pub regen: RegenReport,
}

/// A generated sentence plus the media chosen to accompany it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub result: GenerationResult,
    pub attachment: Option<ResolvedAttachment>,
}

pub struct CorpusEngine {
    config: CorpusConfig,
    store_file: RecordStoreFile,
    model_file: ModelArtifact,
    pending: Mutex<PendingBuffers>,
    /// Current epoch.  Replaced wholesale by regeneration; readers keep their
    /// own `Arc` for as long as they need it.
    model: RwLock<Arc<ChainModel>>,
    /// Held for the duration of a regeneration.  Never awaited: a second
    /// trigger is rejected rather than queued.
    regen_gate: Mutex<()>,
}

impl CorpusEngine {
    /// Engine with an empty in-memory model.  Nothing is read from disk.
    pub fn new(config: CorpusConfig) -> Self {
        Self {
            store_file: RecordStoreFile::new(config.records_path()),
            model_file: ModelArtifact::new(config.model_path()),
            config,
            pending: Mutex::new(PendingBuffers::default()),
            model: RwLock::new(Arc::new(ChainModel::default())),
            regen_gate: Mutex::new(()),
        }
    }

    /// Load the cached model from disk, or regenerate when it is missing,
    /// unreadable, or built with a different state size.
    pub async fn open(config: CorpusConfig) -> Result<Self, CorpusError> {
        let engine = Self::new(config);
        let path = engine.model_file.path().display().to_string();

        match engine.model_file.load().await {
            Ok(model) if model.state_size() == engine.config.state_size => {
                info!(
                    path = %path,
                    records = model.records().len(),
                    states = model.state_count(),
                    "chain model loaded"
                );
                *engine.model.write().await = Arc::new(model);
                return Ok(engine);
            }
            Ok(model) => {
                info!(
                    path = %path,
                    cached = model.state_size(),
                    configured = engine.config.state_size,
                    "cached chain model uses another state size, rebuilding"
                );
            }
            Err(StorageError::Unavailable { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %path, "chain model missing, generating");
            }
            Err(err) => {
                warn!(error = %err, "cached chain model unusable, rebuilding from record store");
            }
        }

        engine.regenerate().await?;
        Ok(engine)
    }

    pub fn config(&self) -> &CorpusConfig {
        &self.config
    }

    /// Queue newly observed records for the next regeneration.
    pub async fn ingest(&self, batch: impl IntoIterator<Item = Record>) {
        self.pending.lock().await.ingest(batch);
    }

    /// Queue a record id for removal at the next regeneration.
    pub async fn mark_deleted(&self, id: impl Into<String>) {
        let id = id.into();
        info!(id = %id, "message deletion queued");
        self.pending.lock().await.mark_deleted(id);
    }

    pub async fn pending(&self) -> PendingMark {
        self.pending.lock().await.mark()
    }

    /// Snapshot of the current epoch.
    pub async fn model(&self) -> Arc<ChainModel> {
        Arc::clone(&*self.model.read().await)
    }

    /// Fold pending work into the persisted store, then rebuild and persist
    /// the model.
    ///
    /// The store is written before the pending buffers are drained, and the
    /// model only after both.  When the store write fails the buffers are
    /// kept and the error is returned.
    pub async fn regenerate(&self) -> Result<RegenReport, CorpusError> {
        let Ok(_gate) = self.regen_gate.try_lock() else {
            warn!("regeneration requested while another one is running");
            return Err(CorpusError::RegenerationInProgress);
        };

        let current = self.store_file.load_or_placeholder().await;
        self.rebuild_from(current).await
    }

    /// Reconcile pending work onto `current` and publish the result.  The
    /// caller holds `regen_gate`.
    async fn rebuild_from(&self, current: RecordStore) -> Result<RegenReport, CorpusError> {
        info!("regenerating markov corpus");
        let (additions, deletions, mark) = {
            let pending = self.pending.lock().await;
            (pending.additions().to_vec(), pending.deletions().to_vec(), pending.mark())
        };

        let outcome = reconcile(current, &additions, &deletions);
        self.store_file.save(&outcome.store).await?;
        self.pending.lock().await.drain_through(mark);

        let model = ChainModel::build(&outcome.store, self.config.state_size);
        let report = RegenReport {
            records: outcome.store.len(),
            added: outcome.added,
            deleted: outcome.deleted,
            states: model.state_count(),
            transitions: model.transition_count(),
        };
        let model = Arc::new(model);
        *self.model.write().await = Arc::clone(&model);

        if let Err(err) = self.model_file.save(&model).await {
            // A stale cache must not outlive a newer store.
            let _ = tokio::fs::remove_file(self.model_file.path()).await;
            warn!(error = %err, "record store saved but chain model was not persisted");
            return Err(err.into());
        }

        info!(
            records = report.records,
            added = report.added,
            deleted = report.deleted,
            transitions = report.transitions,
            "done regenerating markov corpus"
        );
        Ok(report)
    }

    /// Rebuild the corpus from a channel's full history.
    ///
    /// The history is fetched before anything on disk changes; a failed fetch
    /// leaves the persisted store as it was.  The old records are then
    /// replaced in a single store write, under the regeneration gate.
    pub async fn train(&self, source: &dyn HistorySource, channel: &str) -> anyhow::Result<TrainReport> {
        let records = collect_history(source, channel).await?;
        let fetched = records.len();

        let Ok(_gate) = self.regen_gate.try_lock() else {
            return Err(CorpusError::RegenerationInProgress.into());
        };
        info!(
            fetched,
            channel,
            path = %self.store_file.path().display(),
            "replacing record store with channel history"
        );
        self.ingest(records).await;
        let regen = self.rebuild_from(RecordStore::default()).await?;
        Ok(TrainReport { fetched, regen })
    }

    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerationResult, CorpusError> {
        let model = self.model().await;
        let mut rng = rand::rng();
        generator::generate(&model, options, &mut rng)
    }

    /// Generate a sentence and pick its attachment from the same epoch.
    pub async fn respond(&self, options: GenerateOptions) -> Result<Reply, CorpusError> {
        let model = self.model().await;
        let mut rng = rand::rng();
        let result = generator::generate(&model, options, &mut rng)?;
        let attachment = generator::resolve_attachment(&result, model.records(), &mut rng);
        Ok(Reply { result, attachment })
    }
}
