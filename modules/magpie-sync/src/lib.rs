pub mod analyzer;
pub mod embedder;
pub mod enrich;
pub mod hydrator;
pub mod pipeline;
pub mod source;
pub mod state;
pub mod stats;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use embedder::Embedder;
pub use enrich::{EnrichStats, EnrichmentController, MAX_ENRICH_BATCH};
pub use hydrator::TweetHydrator;
pub use pipeline::{RunPhase, SyncPipeline};
pub use source::{BookmarkSource, JsonFileSource};
pub use state::{FileStateStore, SyncState, SyncStateStore};
pub use stats::SyncStats;
pub use store::{BookmarkStore, GraphStore};
