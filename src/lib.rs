pub mod announce;
pub mod config;
pub mod dao;
pub mod db;
pub mod giphy;
pub mod media;
pub mod pack;
pub mod preview;
pub mod sync;
pub mod telegram;
pub mod types;

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::config::{Config, FailurePolicy};
    pub use crate::db::Database;
    pub use crate::pack::{PackError, PackService, PackSynchronizer};
    pub use crate::sync::{ItemSource, MediaFetcher, Orchestrator, SyncOptions, SyncPlan};
    pub use crate::types::{RunStatus, SourceItem, StickerAsset, SyncReport};
}
