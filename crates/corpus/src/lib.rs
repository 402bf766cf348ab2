pub mod chain;
pub mod engine;
pub mod error;
pub mod generator;
pub mod history;
pub mod persistence;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use chain::ChainModel;
pub use engine::{CorpusEngine, RegenReport, Reply, TrainReport};
pub use error::{CorpusError, PersistError, StorageError};
pub use generator::{AttachmentOrigin, GenerateOptions, GenerationResult, ResolvedAttachment};
pub use history::{HistoryItem, HistoryPager, HistorySource};
pub use schema::Record;
pub use store::RecordStore;
