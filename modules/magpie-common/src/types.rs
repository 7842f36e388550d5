use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MagpieError;

// --- Bookmark input ---

/// A raw bookmark record as emitted by the upstream collector.
///
/// The collector is opaque to us; this is the only shape we accept from it.
/// `id` is the tweet's own id and is stable across syncs. Everything else is
/// optional because capture quality varies — a record with nothing but an id
/// is still valid (it becomes a sparse Tweet node, repairable by enrichment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub quote_of: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub bookmark_url: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

impl BookmarkRecord {
    /// Parse and validate a raw JSON value from the collector.
    /// Malformed records are rejected here, before any of the pipeline runs.
    pub fn from_value(value: serde_json::Value) -> Result<Self, MagpieError> {
        let record: BookmarkRecord = serde_json::from_value(value)
            .map_err(|e| MagpieError::Validation(format!("malformed record: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), MagpieError> {
        if self.id.trim().is_empty() {
            return Err(MagpieError::Validation("record id is empty".to_string()));
        }
        Ok(())
    }
}

// --- Extracted facts ---

/// Everything the analyzer derives from a record's text, plus the embedding
/// once computed. BTreeSet so iteration order is deterministic — tests and
/// Cypher parameter lists depend on that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub hashtags: BTreeSet<String>,
    pub mentions: BTreeSet<String>,
    pub urls: BTreeSet<String>,
    pub themes: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    /// Absent when embedding failed — the record is still stored, just
    /// invisible to similarity search until re-embedded.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

// --- Graph vocabulary ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tweet,
    User,
    Hashtag,
    Theme,
    Entity,
    Url,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Tweet,
        NodeKind::User,
        NodeKind::Hashtag,
        NodeKind::Theme,
        NodeKind::Entity,
        NodeKind::Url,
    ];

    /// The Neo4j label for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Tweet => "Tweet",
            NodeKind::User => "User",
            NodeKind::Hashtag => "Hashtag",
            NodeKind::Theme => "Theme",
            NodeKind::Entity => "Entity",
            NodeKind::Url => "Url",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelKind {
    Posted,
    HasHashtag,
    Mentions,
    MentionsEntity,
    AboutTheme,
    ContainsUrl,
    ReplyTo,
    Quotes,
}

impl RelKind {
    /// The Neo4j relationship type for this kind.
    pub fn rel_type(&self) -> &'static str {
        match self {
            RelKind::Posted => "POSTED",
            RelKind::HasHashtag => "HAS_HASHTAG",
            RelKind::Mentions => "MENTIONS",
            RelKind::MentionsEntity => "MENTIONS_ENTITY",
            RelKind::AboutTheme => "ABOUT_THEME",
            RelKind::ContainsUrl => "CONTAINS_URL",
            RelKind::ReplyTo => "REPLY_TO",
            RelKind::Quotes => "QUOTES",
        }
    }
}

impl std::fmt::Display for RelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rel_type())
    }
}

// --- Enrichment ---

/// The authoritative replacement for a truncated tweet, as resolved from the
/// hydration source. Applied via the writer's enrichment path, which sets
/// `truncated = false` and never the reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentUpdate {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub hashtags: BTreeSet<String>,
    pub mentions: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_with_only_id_is_valid() {
        let record = BookmarkRecord::from_value(serde_json::json!({"id": "123"}))
            .expect("minimal record should parse");
        assert_eq!(record.id, "123");
        assert_eq!(record.text, "");
        assert!(!record.truncated);
        assert!(record.urls.is_empty());
    }

    #[test]
    fn record_without_id_is_rejected() {
        let err = BookmarkRecord::from_value(serde_json::json!({"text": "hello"})).unwrap_err();
        assert!(matches!(err, MagpieError::Validation(_)));
    }

    #[test]
    fn record_with_blank_id_is_rejected() {
        let err = BookmarkRecord::from_value(serde_json::json!({"id": "  "})).unwrap_err();
        assert!(matches!(err, MagpieError::Validation(_)));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let record = BookmarkRecord::from_value(serde_json::json!({
            "id": "9",
            "text": "hi",
            "edit_history_tweet_ids": ["9"]
        }))
        .expect("extra collector fields should not fail parsing");
        assert_eq!(record.text, "hi");
    }

    #[test]
    fn node_kind_labels_are_graph_labels() {
        assert_eq!(NodeKind::Tweet.label(), "Tweet");
        assert_eq!(NodeKind::Url.to_string(), "Url");
        assert_eq!(RelKind::HasHashtag.rel_type(), "HAS_HASHTAG");
        assert_eq!(RelKind::ReplyTo.to_string(), "REPLY_TO");
    }
}
