//! In-memory fakes for the pipeline seams. Unit tests use these directly;
//! the `test-support` feature exposes them to integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use magpie_common::{BookmarkRecord, EnrichmentUpdate, ExtractedFacts, MagpieError};
use xapi_client::HydratedTweet;

use crate::embedder::Embedder;
use crate::hydrator::TweetHydrator;
use crate::source::BookmarkSource;
use crate::state::{SyncState, SyncStateStore};
use crate::store::BookmarkStore;

// --- Source ---

pub struct MockSource {
    records: Vec<serde_json::Value>,
    fail: bool,
    last_cursor: Mutex<Option<String>>,
}

impl MockSource {
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Self {
            records,
            fail: false,
            last_cursor: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            fail: true,
            last_cursor: Mutex::new(None),
        }
    }

    /// The cursor passed to the most recent `fetch` call.
    pub fn last_cursor(&self) -> Option<String> {
        self.last_cursor.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookmarkSource for MockSource {
    async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<serde_json::Value>, MagpieError> {
        *self.last_cursor.lock().unwrap() = cursor.map(str::to_string);
        if self.fail {
            return Err(MagpieError::Validation("source unavailable".to_string()));
        }
        Ok(self.records.clone())
    }
}

// --- Store ---

/// A stored tweet as the mock graph sees it.
#[derive(Debug, Clone, Default)]
pub struct StoredTweet {
    pub text: String,
    pub author_username: Option<String>,
    pub truncated: bool,
    pub enriched: bool,
    pub is_stub: bool,
    pub embedding: Option<Vec<f32>>,
    pub hashtags: BTreeSet<String>,
    pub mentions: BTreeSet<String>,
}

#[derive(Default)]
struct MockGraph {
    tweets: BTreeMap<String, StoredTweet>,
    /// Non-tweet nodes as (label, key).
    nodes: BTreeSet<(String, String)>,
    /// Edges as (rel_type, from, to) over natural keys.
    edges: BTreeSet<(String, String, String)>,
}

/// Mirrors the writer's merge semantics closely enough for pipeline tests:
/// node and edge merges are idempotent, re-ingest never overwrites text or
/// author, `truncated` only moves toward false, references create stub
/// targets, and enrichment replaces the POSTED edge.
pub struct MockStore {
    graph: Mutex<MockGraph>,
    fail_upserts: bool,
    fail_ids: HashSet<String>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(MockGraph::default()),
            fail_upserts: false,
            fail_ids: HashSet::new(),
        }
    }

    pub fn failing_upserts(mut self) -> Self {
        self.fail_upserts = true;
        self
    }

    /// Fail the upsert of one specific id; everything else stores normally.
    pub fn failing_upsert_for(mut self, id: &str) -> Self {
        self.fail_ids.insert(id.to_string());
        self
    }

    /// Seed a truncated tweet awaiting enrichment.
    pub fn seed_truncated(&self, id: &str) {
        let mut graph = self.graph.lock().unwrap();
        graph.tweets.insert(
            id.to_string(),
            StoredTweet {
                text: format!("partial text of {id}\u{2026}"),
                truncated: true,
                ..Default::default()
            },
        );
    }

    pub fn tweet(&self, id: &str) -> Option<StoredTweet> {
        self.graph.lock().unwrap().tweets.get(id).cloned()
    }

    pub fn node_count(&self) -> usize {
        let graph = self.graph.lock().unwrap();
        graph.tweets.len() + graph.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.lock().unwrap().edges.len()
    }

    pub fn has_edge(&self, rel: &str, from: &str, to: &str) -> bool {
        self.graph
            .lock()
            .unwrap()
            .edges
            .contains(&(rel.to_string(), from.to_string(), to.to_string()))
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraph {
    fn merge_edge(&mut self, rel: &str, from: &str, to: &str) -> u64 {
        let inserted = self
            .edges
            .insert((rel.to_string(), from.to_string(), to.to_string()));
        u64::from(inserted)
    }

    fn merge_node(&mut self, label: &str, key: &str) {
        self.nodes.insert((label.to_string(), key.to_string()));
    }

    fn merge_stub(&mut self, id: &str) {
        self.tweets.entry(id.to_string()).or_insert(StoredTweet {
            is_stub: true,
            ..Default::default()
        });
    }

    /// Point the tweet's single POSTED edge at `username`, dropping the
    /// edge from any previously recorded author.
    fn set_author(&mut self, tweet_id: &str, username: &str) {
        let tweet_key = format!("tweet:{tweet_id}");
        let previous = self
            .tweets
            .get(tweet_id)
            .and_then(|t| t.author_username.clone());
        if let Some(previous) = previous.filter(|p| p != username) {
            self.edges.remove(&(
                "POSTED".to_string(),
                format!("user:{previous}"),
                tweet_key.clone(),
            ));
        }
        self.tweets.get_mut(tweet_id).unwrap().author_username = Some(username.to_string());
        self.merge_node("User", username);
        self.merge_edge("POSTED", &format!("user:{username}"), &tweet_key);
    }
}

#[async_trait]
impl BookmarkStore for MockStore {
    async fn upsert(
        &self,
        record: &BookmarkRecord,
        facts: &ExtractedFacts,
    ) -> Result<u64, MagpieError> {
        if self.fail_upserts || self.fail_ids.contains(&record.id) {
            return Err(MagpieError::TransientStore("mock upsert failure".to_string()));
        }
        let mut graph = self.graph.lock().unwrap();
        let before = graph.edges.len();

        let tweet = graph.tweets.entry(record.id.clone()).or_default();
        if tweet.is_stub || tweet.text.is_empty() {
            tweet.text = record.text.clone();
            tweet.truncated = record.truncated;
            tweet.is_stub = false;
        } else {
            tweet.truncated = tweet.truncated && record.truncated;
        }
        if let Some(embedding) = &facts.embedding {
            tweet.embedding = Some(embedding.clone());
        }
        tweet.hashtags.extend(facts.hashtags.iter().cloned());
        tweet.mentions.extend(facts.mentions.iter().cloned());

        let tweet_key = format!("tweet:{}", record.id);
        if let Some(username) = &record.author_username {
            let username = username.to_lowercase();
            // First recorded author wins; only enrichment replaces it.
            let current = graph.tweets[&record.id].author_username.clone();
            if current.is_none() || current.as_deref() == Some(username.as_str()) {
                graph.set_author(&record.id, &username);
            }
        }
        for (label, rel, keys) in [
            ("Hashtag", "HAS_HASHTAG", &facts.hashtags),
            ("User", "MENTIONS", &facts.mentions),
            ("Entity", "MENTIONS_ENTITY", &facts.entities),
            ("Theme", "ABOUT_THEME", &facts.themes),
            ("Url", "CONTAINS_URL", &facts.urls),
        ] {
            for key in keys {
                graph.merge_node(label, key);
                graph.merge_edge(rel, &tweet_key, &format!("{}:{key}", label.to_lowercase()));
            }
        }
        for (rel, target) in [("REPLY_TO", &record.reply_to), ("QUOTES", &record.quote_of)] {
            if let Some(target) = target {
                graph.merge_stub(target);
                graph.merge_edge(rel, &tweet_key, &format!("tweet:{target}"));
            }
        }
        Ok((graph.edges.len() - before) as u64)
    }

    async fn apply_enrichment(&self, update: &EnrichmentUpdate) -> Result<(), MagpieError> {
        let mut graph = self.graph.lock().unwrap();

        let tweet = graph.tweets.entry(update.id.clone()).or_default();
        tweet.text = update.text.clone();
        tweet.truncated = false;
        tweet.enriched = true;
        tweet.is_stub = false;
        tweet.hashtags.extend(update.hashtags.iter().cloned());
        tweet.mentions.extend(update.mentions.iter().cloned());

        let tweet_key = format!("tweet:{}", update.id);
        if let Some(username) = &update.author_username {
            let username = username.to_lowercase();
            // Enrichment is authoritative; the stale edge goes away.
            graph.set_author(&update.id, &username);
        }
        for tag in &update.hashtags {
            graph.merge_node("Hashtag", tag);
            graph.merge_edge("HAS_HASHTAG", &tweet_key, &format!("hashtag:{tag}"));
        }
        for mention in &update.mentions {
            graph.merge_node("User", mention);
            graph.merge_edge("MENTIONS", &tweet_key, &format!("user:{mention}"));
        }
        Ok(())
    }

    async fn truncated_ids(&self, limit: usize) -> Result<Vec<String>, MagpieError> {
        Ok(self
            .graph
            .lock()
            .unwrap()
            .tweets
            .iter()
            .filter(|(_, t)| t.truncated && !t.is_stub)
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn stored_ids(&self) -> Result<BTreeSet<String>, MagpieError> {
        Ok(self
            .graph
            .lock()
            .unwrap()
            .tweets
            .iter()
            .filter(|(_, t)| !t.is_stub && !t.text.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

// --- Embedder ---

/// Deterministic embedder: every text maps to the same unit vector derived
/// from a cheap hash, so similarity assertions are stable across runs.
pub struct FixedEmbedder {
    dimension: usize,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MagpieError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(MagpieError::Validation(
                "embedding provider rejected the request".to_string(),
            ));
        }
        let mut seed = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            vector.push(((seed >> 33) as f32 / (1u64 << 31) as f32) - 0.5);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
        Ok(vector.into_iter().map(|v| v / norm).collect())
    }
}

// --- State store ---

pub struct MemoryStateStore {
    state: Mutex<Option<SyncState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<SyncState>, MagpieError> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn persist(&self, state: &SyncState) -> Result<(), MagpieError> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

// --- Hydrator ---

pub struct MockHydrator {
    tweets: HashMap<String, HydratedTweet>,
    failing_batches: HashSet<usize>,
    rate_limited_batch: Option<usize>,
    batches: AtomicUsize,
}

impl MockHydrator {
    pub fn new() -> Self {
        Self {
            tweets: HashMap::new(),
            failing_batches: HashSet::new(),
            rate_limited_batch: None,
            batches: AtomicUsize::new(0),
        }
    }

    pub fn with_tweet(mut self, tweet: HydratedTweet) -> Self {
        self.tweets.insert(tweet.id.clone(), tweet);
        self
    }

    /// Make the nth batch (0-based) fail with a transient error.
    pub fn failing_batch(mut self, index: usize) -> Self {
        self.failing_batches.insert(index);
        self
    }

    /// Make the nth batch (0-based) hit the rate limit.
    pub fn rate_limited_batch(mut self, index: usize) -> Self {
        self.rate_limited_batch = Some(index);
        self
    }

    /// Number of batch lookups attempted so far.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }
}

impl Default for MockHydrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TweetHydrator for MockHydrator {
    async fn tweets_by_ids(&self, ids: &[String]) -> Result<Vec<HydratedTweet>, MagpieError> {
        let index = self.batches.fetch_add(1, Ordering::Relaxed);
        if self.rate_limited_batch == Some(index) {
            return Err(MagpieError::RateLimited("mock hydrator".to_string()));
        }
        if self.failing_batches.contains(&index) {
            return Err(MagpieError::TransientNetwork("mock batch failure".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.tweets.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> BookmarkRecord {
        BookmarkRecord::from_value(serde_json::json!({
            "id": id,
            "text": "hello",
            "author_username": "Alice",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MockStore::new();
        let facts = ExtractedFacts {
            hashtags: ["rust".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let created = store.upsert(&record("1"), &facts).await.unwrap();
        assert_eq!(created, 2, "POSTED + HAS_HASHTAG");
        let created = store.upsert(&record("1"), &facts).await.unwrap();
        assert_eq!(created, 0, "re-ingest creates nothing");
        assert_eq!(store.edge_count(), 2);
    }

    #[tokio::test]
    async fn reference_creates_stub_that_later_fills() {
        let store = MockStore::new();
        let reply = BookmarkRecord::from_value(
            serde_json::json!({"id": "2", "text": "replying", "reply_to": "1"}),
        )
        .unwrap();
        store
            .upsert(&reply, &ExtractedFacts::default())
            .await
            .unwrap();
        assert!(store.tweet("1").unwrap().is_stub);
        assert!(store.has_edge("REPLY_TO", "tweet:2", "tweet:1"));
        assert!(!store.stored_ids().await.unwrap().contains("1"));

        store
            .upsert(&record("1"), &ExtractedFacts::default())
            .await
            .unwrap();
        let filled = store.tweet("1").unwrap();
        assert!(!filled.is_stub);
        assert_eq!(filled.text, "hello");
    }

    #[tokio::test]
    async fn truncated_only_moves_toward_false() {
        let store = MockStore::new();
        store.seed_truncated("1");
        let mut full = record("1");
        full.truncated = false;
        // The seeded text survives; only the flag moves.
        store
            .upsert(&full, &ExtractedFacts::default())
            .await
            .unwrap();
        assert!(!store.tweet("1").unwrap().truncated);

        let mut partial = record("1");
        partial.truncated = true;
        store
            .upsert(&partial, &ExtractedFacts::default())
            .await
            .unwrap();
        assert!(!store.tweet("1").unwrap().truncated, "never back to true");
    }

    #[tokio::test]
    async fn author_correction_replaces_the_posted_edge() {
        let store = MockStore::new();
        let rec = BookmarkRecord::from_value(serde_json::json!({
            "id": "1",
            "text": "truncated\u{2026}",
            "author_username": "alice_old",
        }))
        .unwrap();
        store
            .upsert(&rec, &ExtractedFacts::default())
            .await
            .unwrap();
        assert!(store.has_edge("POSTED", "user:alice_old", "tweet:1"));

        let update = EnrichmentUpdate {
            id: "1".to_string(),
            text: "full text".to_string(),
            author_id: Some("7".to_string()),
            author_username: Some("Alice".to_string()),
            hashtags: BTreeSet::new(),
            mentions: BTreeSet::new(),
        };
        store.apply_enrichment(&update).await.unwrap();

        assert!(store.has_edge("POSTED", "user:alice", "tweet:1"));
        assert!(
            !store.has_edge("POSTED", "user:alice_old", "tweet:1"),
            "a tweet keeps exactly one inbound POSTED edge"
        );
        assert_eq!(
            store.tweet("1").unwrap().author_username.as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn stale_reingest_keeps_the_recorded_author() {
        let store = MockStore::new();
        store
            .upsert(&record("1"), &ExtractedFacts::default())
            .await
            .unwrap();

        let mut stale = record("1");
        stale.author_username = Some("bob".to_string());
        let created = store
            .upsert(&stale, &ExtractedFacts::default())
            .await
            .unwrap();

        assert_eq!(created, 0, "no second POSTED edge");
        assert!(store.has_edge("POSTED", "user:alice", "tweet:1"));
        assert!(!store.has_edge("POSTED", "user:bob", "tweet:1"));
    }

    #[tokio::test]
    async fn fixed_embedder_is_deterministic_and_unit_length() {
        let embedder = FixedEmbedder::new(16);
        let a = embedder.embed("same text").await.unwrap();
        let b = embedder.embed("same text").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.calls(), 2);
    }
}
