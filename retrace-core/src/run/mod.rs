pub mod catalog;
pub mod error;
pub mod models;
pub mod repository;
pub mod store;

pub use catalog::{ActionSummary, RecordedAction, Recording, SelectorSet, TestDefinition};
pub use error::{StoreError, StoreResult};
pub use models::{
    ActionOutcome, ActionResultRecord, BrowserEngine, BrowserResultRecord, Run, RunCompletion,
    RunKind, RunStats, RunStatus, SelectorMetadata,
};
pub use repository::RunStore;
pub use store::{SqliteRunStore, SqliteRunStoreBuilder};
