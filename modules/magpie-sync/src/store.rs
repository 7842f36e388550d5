//! Graph store seam. The pipeline and the enrichment controller talk to
//! this trait; production wires in the Neo4j-backed `GraphStore`, tests
//! wire in `MockStore`.

use std::collections::BTreeSet;

use async_trait::async_trait;

use magpie_common::{BookmarkRecord, EnrichmentUpdate, ExtractedFacts, MagpieError};
use magpie_graph::{GraphClient, GraphReader, GraphStats, GraphWriter};

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Upsert a tweet with all relationships; returns the number of
    /// relationships created (zero on an identical re-ingest).
    async fn upsert(
        &self,
        record: &BookmarkRecord,
        facts: &ExtractedFacts,
    ) -> Result<u64, MagpieError>;

    /// Apply an authoritative enrichment result, clearing `truncated`.
    async fn apply_enrichment(&self, update: &EnrichmentUpdate) -> Result<(), MagpieError>;

    /// Ids of tweets still marked truncated.
    async fn truncated_ids(&self, limit: usize) -> Result<Vec<String>, MagpieError>;

    /// Ids of every fully ingested (non-stub) tweet.
    async fn stored_ids(&self) -> Result<BTreeSet<String>, MagpieError>;
}

/// Neo4j-backed store.
pub struct GraphStore {
    writer: GraphWriter,
    reader: GraphReader,
}

impl GraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self {
            writer: GraphWriter::new(client.clone()),
            reader: GraphReader::new(client),
        }
    }

    pub async fn stats(&self) -> Result<GraphStats, MagpieError> {
        self.reader.stats().await.map_err(store_error)
    }
}

#[async_trait]
impl BookmarkStore for GraphStore {
    async fn upsert(
        &self,
        record: &BookmarkRecord,
        facts: &ExtractedFacts,
    ) -> Result<u64, MagpieError> {
        self.writer
            .upsert_tweet(record, facts)
            .await
            .map_err(store_error)
    }

    async fn apply_enrichment(&self, update: &EnrichmentUpdate) -> Result<(), MagpieError> {
        self.writer
            .apply_enrichment(update)
            .await
            .map_err(store_error)
    }

    async fn truncated_ids(&self, limit: usize) -> Result<Vec<String>, MagpieError> {
        self.reader.truncated_ids(limit).await.map_err(store_error)
    }

    async fn stored_ids(&self) -> Result<BTreeSet<String>, MagpieError> {
        self.reader.stored_ids().await.map_err(store_error)
    }
}

/// Bolt errors are connection/transient by nature here: schema problems are
/// caught by migrations and malformed records never reach the writer.
fn store_error(err: neo4rs::Error) -> MagpieError {
    MagpieError::TransientStore(err.to_string())
}
