use chrono::{DateTime, Utc};
use serde::Deserialize;

// --- Wire types for GET /2/tweets ---

/// Response envelope. `data` holds resolved tweets; ids the API could not
/// resolve (deleted, protected) appear in `errors` instead.
#[derive(Debug, Clone, Deserialize)]
pub struct TweetLookupResponse {
    #[serde(default)]
    pub data: Vec<ApiTweet>,
    #[serde(default)]
    pub includes: Option<Includes>,
    #[serde(default)]
    pub errors: Vec<LookupError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiTweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Option<TweetEntities>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetEntities {
    #[serde(default)]
    pub hashtags: Vec<HashtagEntity>,
    #[serde(default)]
    pub mentions: Vec<MentionEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashtagEntity {
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionEntity {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<ApiUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: String,
    pub username: String,
}

/// Per-id lookup failure. `value` is the id that failed.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupError {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

// --- Joined output ---

/// A tweet joined with its author's username from the response includes.
/// This is what enrichment consumes; the envelope never leaves this crate.
#[derive(Debug, Clone)]
pub struct HydratedTweet {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub author_username: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
}
