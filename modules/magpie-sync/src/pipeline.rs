//! SyncPipeline — the end-to-end ingestion run.
//!
//! Drives fetch → filter → analyze → embed → write → report over one batch
//! of raw bookmark records, with bounded concurrency for the network-bound
//! stages and per-call timeouts and retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::Rng;
use tracing::{info, warn};

use magpie_common::{BookmarkRecord, ExtractedFacts, MagpieError};

use crate::analyzer::Analyzer;
use crate::embedder::Embedder;
use crate::source::BookmarkSource;
use crate::state::{compare_ids, SyncState, SyncStateStore};
use crate::stats::SyncStats;
use crate::store::BookmarkStore;

/// Per-call timeout for network operations; a timeout is a transient failure.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Max attempts for transient failures.
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff duration. Actual delay is base * 3^attempt plus 0-250ms jitter.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Persist state every N stored records, so a crash loses at most the
/// in-flight tail of a large run.
const CHECKPOINT_EVERY: u32 = 100;

/// How many truncated ids to scan when reporting enrichment backlog.
const PENDING_SCAN_LIMIT: usize = 10_000;

/// The run's state machine. Linear, single pass per batch; `Failed` is
/// reachable from any state on unrecoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Fetching,
    Filtering,
    Analyzing,
    Embedding,
    Writing,
    Reporting,
    Done,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Fetching => "fetching",
            RunPhase::Filtering => "filtering",
            RunPhase::Analyzing => "analyzing",
            RunPhase::Embedding => "embedding",
            RunPhase::Writing => "writing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

enum WriteOutcome {
    Stored { id: String, embed_failed: bool },
    Failed { id: String },
    Skipped { id: String },
}

/// Track the oldest id that must stay fetchable next run.
fn lower_floor(floor: &mut Option<String>, id: String) {
    let lower = floor
        .as_deref()
        .is_none_or(|f| compare_ids(&id, f).is_lt());
    if lower {
        *floor = Some(id);
    }
}

pub struct SyncPipeline {
    source: Arc<dyn BookmarkSource>,
    store: Arc<dyn BookmarkStore>,
    embedder: Arc<dyn Embedder>,
    analyzer: Analyzer,
    state: SyncState,
    state_store: Arc<dyn SyncStateStore>,
    workers: usize,
    cancelled: Arc<AtomicBool>,
    run_id: String,
    phase: RunPhase,
}

impl SyncPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn BookmarkSource>,
        store: Arc<dyn BookmarkStore>,
        embedder: Arc<dyn Embedder>,
        analyzer: Analyzer,
        state: SyncState,
        state_store: Arc<dyn SyncStateStore>,
        workers: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            store,
            embedder,
            analyzer,
            state,
            state_store,
            workers: workers.max(1),
            cancelled,
            run_id: uuid::Uuid::new_v4().to_string(),
            phase: RunPhase::Fetching,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Run one sync pass. `full` ignores the cursor and re-submits the whole
    /// export; the seen-set still skips records already stored.
    pub async fn run(&mut self, full: bool) -> Result<SyncStats, MagpieError> {
        info!(run_id = %self.run_id, full, "Sync run starting");
        let mut stats = SyncStats::default();
        match self.run_inner(full, &mut stats).await {
            Ok(()) => {
                self.set_phase(RunPhase::Done);
                info!("{stats}");
                Ok(stats)
            }
            Err(e) => {
                self.set_phase(RunPhase::Failed);
                // Whatever was durably written before the failure stays seen.
                if let Err(persist_err) = self.state_store.persist(&self.state) {
                    warn!(error = %persist_err, "Failed to persist state after run failure");
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, full: bool, stats: &mut SyncStats) -> Result<(), MagpieError> {
        self.set_phase(RunPhase::Fetching);
        let cursor = if full {
            None
        } else {
            self.state.cursor().map(str::to_string)
        };
        let raw = self.source.fetch(cursor.as_deref()).await?;
        stats.total_received = raw.len() as u32;

        self.set_phase(RunPhase::Filtering);
        let mut new_records = Vec::new();
        for value in raw {
            match BookmarkRecord::from_value(value) {
                Ok(record) => {
                    if self.state.is_new(&record.id) {
                        new_records.push(record);
                    } else {
                        stats.duplicates_skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping malformed record");
                    stats.validation_failures += 1;
                }
            }
        }
        info!(
            new = new_records.len(),
            duplicates = stats.duplicates_skipped,
            invalid = stats.validation_failures,
            "Filtering complete"
        );

        self.set_phase(RunPhase::Analyzing);
        let analyzed: Vec<(BookmarkRecord, ExtractedFacts)> = new_records
            .into_iter()
            .map(|mut record| {
                if !record.truncated {
                    record.truncated = self.analyzer.is_truncated(&record.text);
                }
                let mut facts = self.analyzer.analyze(&record.text);
                facts.urls.extend(record.urls.iter().cloned());
                (record, facts)
            })
            .collect();

        // Oldest id this run failed to store (upsert failure or
        // cancellation); the cursor must never pass it.
        let mut refetch_floor: Option<String> = None;

        self.set_phase(RunPhase::Embedding);
        let embed_futures: Vec<_> = analyzed
            .into_iter()
            .map(|(record, facts)| {
                let embedder = self.embedder.clone();
                let cancelled = self.cancelled.clone();
                async move {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(record.id);
                    }
                    Ok(embed_record(&*embedder, record, facts).await)
                }
            })
            .collect();
        let embedded: Vec<_> = stream::iter(embed_futures)
            .buffer_unordered(self.workers)
            .collect()
            .await;
        let mut ready = Vec::new();
        for item in embedded {
            match item {
                Ok(triple) => ready.push(triple),
                Err(id) => {
                    stats.cancelled = true;
                    lower_floor(&mut refetch_floor, id);
                }
            }
        }

        self.set_phase(RunPhase::Writing);
        let write_futures: Vec<_> = ready
            .into_iter()
            .map(|(record, facts, embed_failed)| {
                let store = self.store.clone();
                let cancelled = self.cancelled.clone();
                async move {
                    if cancelled.load(Ordering::Relaxed) {
                        return WriteOutcome::Skipped { id: record.id };
                    }
                    match with_retry("upsert", || store.upsert(&record, &facts)).await {
                        Ok(_created) => WriteOutcome::Stored {
                            id: record.id,
                            embed_failed,
                        },
                        Err(e) => {
                            warn!(id = %record.id, error = %e, "Upsert failed, skipping record");
                            WriteOutcome::Failed { id: record.id }
                        }
                    }
                }
            })
            .collect();

        // Completed futures funnel back here; this loop is the single
        // writer of SyncState. The cursor is not lifted yet — a failed
        // record must stay above it, and outcomes land in any order.
        let mut stored_ids: Vec<String> = Vec::new();
        let mut outcomes = stream::iter(write_futures).buffer_unordered(self.workers);
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                WriteOutcome::Stored { id, embed_failed } => {
                    self.state.seen_ids.insert(id.clone());
                    stored_ids.push(id);
                    stats.new_stored += 1;
                    if embed_failed {
                        stats.embedding_failures += 1;
                    }
                    if stats.new_stored % CHECKPOINT_EVERY == 0 {
                        if let Err(e) = self.state_store.persist(&self.state) {
                            warn!(error = %e, "State checkpoint failed, continuing");
                        }
                    }
                }
                WriteOutcome::Failed { id } => {
                    stats.store_failures += 1;
                    lower_floor(&mut refetch_floor, id);
                }
                WriteOutcome::Skipped { id } => {
                    stats.cancelled = true;
                    lower_floor(&mut refetch_floor, id);
                }
            }
        }
        drop(outcomes);

        // Lift the cursor only past stored ids below the oldest unstored
        // record, so the next incremental fetch returns every failed or
        // cancelled record again. Those above the floor stay in the
        // seen-set, so refetching them costs a duplicate skip, not a
        // second write.
        for id in &stored_ids {
            let blocked = refetch_floor
                .as_deref()
                .is_some_and(|floor| compare_ids(id, floor).is_ge());
            if !blocked {
                self.state.lift_cursor(id);
            }
        }

        self.set_phase(RunPhase::Reporting);
        self.state.last_sync = Some(Utc::now());
        self.state_store.persist(&self.state)?;
        stats.enrichment_pending = match self.store.truncated_ids(PENDING_SCAN_LIMIT).await {
            Ok(ids) => ids.len() as u32,
            Err(e) => {
                warn!(error = %e, "Could not count enrichment backlog");
                0
            }
        };
        Ok(())
    }

    fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        info!(run_id = %self.run_id, %phase, "Pipeline phase");
    }
}

/// Embed one record's text. Failure never drops the record — it flows on
/// without a vector and the failure is counted.
async fn embed_record(
    embedder: &dyn Embedder,
    record: BookmarkRecord,
    mut facts: ExtractedFacts,
) -> (BookmarkRecord, ExtractedFacts, bool) {
    if record.text.is_empty() {
        return (record, facts, false);
    }
    match with_retry("embed", || embedder.embed(&record.text)).await {
        Ok(vector) => {
            facts.embedding = Some(vector);
            (record, facts, false)
        }
        Err(e) => {
            warn!(id = %record.id, error = %e, "Embedding failed, storing without vector");
            (record, facts, true)
        }
    }
}

/// Run a fallible network call with a per-attempt timeout and bounded
/// exponential backoff on transient failures. Non-transient errors
/// surface immediately.
pub(crate) async fn with_retry<T, F, Fut>(op: &str, mut call: F) -> Result<T, MagpieError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, MagpieError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(CALL_TIMEOUT, call()).await {
            Ok(result) => result,
            Err(_) => Err(MagpieError::TransientNetwork(format!(
                "{op} timed out after {}s",
                CALL_TIMEOUT.as_secs()
            ))),
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let backoff = RETRY_BASE * 3u32.pow(attempt);
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "{op} failed, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::testing::{FixedEmbedder, MemoryStateStore, MockSource, MockStore};

    fn bookmark(id: &str, text: &str) -> serde_json::Value {
        serde_json::json!({"id": id, "text": text, "author_username": "alice"})
    }

    struct Harness {
        source: Arc<MockSource>,
        store: Arc<MockStore>,
        embedder: Arc<FixedEmbedder>,
        state_store: Arc<MemoryStateStore>,
        cancelled: Arc<AtomicBool>,
    }

    impl Harness {
        fn new(records: Vec<serde_json::Value>) -> Self {
            Self {
                source: Arc::new(MockSource::new(records)),
                store: Arc::new(MockStore::new()),
                embedder: Arc::new(FixedEmbedder::new(8)),
                state_store: Arc::new(MemoryStateStore::new()),
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }

        fn pipeline(&self, state: SyncState) -> SyncPipeline {
            SyncPipeline::new(
                self.source.clone(),
                self.store.clone(),
                self.embedder.clone(),
                Analyzer::default(),
                state,
                self.state_store.clone(),
                2,
                self.cancelled.clone(),
            )
        }
    }

    #[tokio::test]
    async fn stores_new_records_and_persists_state() {
        let h = Harness::new(vec![bookmark("1", "hello #world"), bookmark("2", "again")]);
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.total_received, 2);
        assert_eq!(stats.new_stored, 2);
        assert_eq!(stats.duplicates_skipped, 0);
        assert_eq!(pipeline.phase(), RunPhase::Done);

        let tweet = h.store.tweet("1").unwrap();
        assert!(tweet.embedding.is_some());
        assert!(tweet.hashtags.contains("world"));

        let persisted = h.state_store.load().unwrap().unwrap();
        assert!(!persisted.is_new("1"));
        assert_eq!(persisted.cursor(), Some("2"));
        assert!(persisted.last_sync.is_some());
    }

    #[tokio::test]
    async fn previously_seen_records_skip_analysis_and_embedding() {
        let h = Harness::new(vec![
            bookmark("1", "seen before"),
            bookmark("2", "also seen"),
            bookmark("3", "fresh"),
        ]);
        let mut state = SyncState::default();
        state.mark_seen("1");
        state.mark_seen("2");
        let mut pipeline = h.pipeline(state);

        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.duplicates_skipped, 2);
        assert_eq!(stats.new_stored, 1);
        assert_eq!(h.embedder.calls(), 1, "only the fresh record is embedded");
        assert!(h.store.tweet("1").is_none());
    }

    #[tokio::test]
    async fn malformed_records_are_dropped_and_counted() {
        let h = Harness::new(vec![
            bookmark("1", "fine"),
            serde_json::json!({"text": "no id"}),
            serde_json::json!({"id": "   "}),
        ]);
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.validation_failures, 2);
        assert_eq!(stats.new_stored, 1);
    }

    #[tokio::test]
    async fn embedding_failure_stores_record_without_vector() {
        let h = Harness::new(vec![bookmark("1", "embed me")]);
        let h = Harness {
            embedder: Arc::new(FixedEmbedder::new(8).failing()),
            ..h
        };
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.new_stored, 1);
        assert_eq!(stats.embedding_failures, 1);
        let tweet = h.store.tweet("1").unwrap();
        assert!(tweet.embedding.is_none(), "never a partial/zero vector");

        // The record is marked seen — it was durably stored.
        assert!(!h.state_store.load().unwrap().unwrap().is_new("1"));
    }

    #[tokio::test]
    async fn store_failure_leaves_record_unseen_for_retry_next_run() {
        let h = Harness::new(vec![bookmark("1", "will not stick")]);
        let h = Harness {
            store: Arc::new(MockStore::new().failing_upserts()),
            ..h
        };
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.new_stored, 0);
        assert_eq!(stats.store_failures, 1);
        assert!(
            h.state_store.load().unwrap().unwrap().is_new("1"),
            "failed record must be reprocessed next run"
        );
    }

    #[tokio::test]
    async fn cursor_never_passes_a_store_failed_record() {
        let h = Harness::new(vec![bookmark("11", "will fail"), bookmark("12", "will store")]);
        let h = Harness {
            store: Arc::new(MockStore::new().failing_upsert_for("11")),
            ..h
        };
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(false).await.unwrap();
        assert_eq!(stats.new_stored, 1);
        assert_eq!(stats.store_failures, 1);

        let persisted = h.state_store.load().unwrap().unwrap();
        assert!(persisted.is_new("11"), "failed record must be reprocessed");
        assert!(!persisted.is_new("12"));
        // The cursor stays below 11 even though 12 stored, so the next
        // incremental fetch returns 11 again.
        let refetchable = persisted
            .cursor()
            .is_none_or(|c| compare_ids("11", c).is_gt());
        assert!(
            refetchable,
            "cursor {:?} must not pass failed id 11",
            persisted.cursor()
        );
    }

    #[tokio::test]
    async fn cursor_still_lifts_below_the_failure_floor() {
        let h = Harness::new(vec![bookmark("11", "will store"), bookmark("12", "will fail")]);
        let h = Harness {
            store: Arc::new(MockStore::new().failing_upsert_for("12")),
            ..h
        };
        let mut pipeline = h.pipeline(SyncState::default());

        pipeline.run(false).await.unwrap();
        let persisted = h.state_store.load().unwrap().unwrap();
        assert_eq!(persisted.cursor(), Some("11"), "progress below the failure is kept");
        assert!(persisted.is_new("12"));
    }

    #[tokio::test]
    async fn second_run_changes_nothing_in_the_graph() {
        let h = Harness::new(vec![bookmark("1", "idempotent #ai")]);
        let mut pipeline = h.pipeline(SyncState::default());
        pipeline.run(true).await.unwrap();
        let edges_after_first = h.store.edge_count();
        let nodes_after_first = h.store.node_count();

        // Fresh state simulates a full re-sync after state loss; the
        // writer-level upsert keeps the graph stable.
        let mut pipeline = h.pipeline(SyncState::default());
        let stats = pipeline.run(true).await.unwrap();
        assert_eq!(stats.new_stored, 1, "reprocessed, not lost");
        assert_eq!(h.store.edge_count(), edges_after_first);
        assert_eq!(h.store.node_count(), nodes_after_first);
    }

    #[tokio::test]
    async fn truncation_is_inferred_when_producer_omits_the_flag() {
        let h = Harness::new(vec![
            bookmark("1", "this one got cut off\u{2026}"),
            bookmark("2", "this one is complete"),
        ]);
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert!(h.store.tweet("1").unwrap().truncated);
        assert!(!h.store.tweet("2").unwrap().truncated);
        assert_eq!(stats.enrichment_pending, 1);
    }

    #[tokio::test]
    async fn incremental_run_passes_cursor_to_source() {
        let h = Harness::new(vec![bookmark("11", "newer")]);
        let mut state = SyncState::default();
        state.mark_seen("10");
        let mut pipeline = h.pipeline(state);

        pipeline.run(false).await.unwrap();
        assert_eq!(h.source.last_cursor(), Some("10".to_string()));

        pipeline.run(true).await.unwrap();
        assert_eq!(h.source.last_cursor(), None, "--full ignores the cursor");
    }

    #[tokio::test]
    async fn cancellation_stops_work_but_persists_progress() {
        let h = Harness::new(vec![bookmark("1", "never processed")]);
        h.cancelled.store(true, Ordering::Relaxed);
        let mut pipeline = h.pipeline(SyncState::default());

        let stats = pipeline.run(true).await.unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.new_stored, 0);
        assert!(h.store.tweet("1").is_none());
        assert!(
            h.state_store.load().unwrap().is_some(),
            "state still persisted on the way out"
        );
    }

    #[tokio::test]
    async fn source_failure_fails_the_run() {
        let h = Harness::new(Vec::new());
        let h = Harness {
            source: Arc::new(MockSource::failing()),
            ..h
        };
        let mut pipeline = h.pipeline(SyncState::default());

        assert!(pipeline.run(true).await.is_err());
        assert_eq!(pipeline.phase(), RunPhase::Failed);
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_transient_errors_immediately() {
        let mut calls = 0u32;
        let result: Result<(), _> = with_retry("op", || {
            calls += 1;
            async { Err(MagpieError::Validation("bad".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let mut calls = 0u32;
        let result = with_retry("op", || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(MagpieError::TransientNetwork("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }
}
