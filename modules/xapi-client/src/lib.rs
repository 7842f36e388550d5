pub mod error;
pub mod types;

pub use error::{Result, XApiError};
pub use types::{ApiTweet, ApiUser, HydratedTweet, Includes, TweetLookupResponse};

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

const BASE_URL: &str = "https://api.x.com/2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard upper bound on ids per lookup request, imposed by the X API.
pub const MAX_BATCH_IDS: usize = 100;

pub struct XApiClient {
    client: reqwest::Client,
    bearer_token: String,
    base_url: String,
}

impl XApiClient {
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bearer_token: bearer_token.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Override the API host (tests point this at a stub server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Batch tweet lookup: `GET /2/tweets?ids=...`. Returns the tweets the
    /// API resolved, joined with author usernames from `includes`. Deleted
    /// or protected ids are simply absent from the result. HTTP 429 maps to
    /// `XApiError::RateLimited`.
    pub async fn tweets_by_ids(&self, ids: &[String]) -> Result<Vec<HydratedTweet>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_BATCH_IDS {
            return Err(XApiError::BatchTooLarge(ids.len()));
        }

        let url = format!("{}/tweets", self.base_url);
        debug!(count = ids.len(), "Tweet lookup request");

        let resp = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("ids", ids.join(",")),
                (
                    "tweet.fields",
                    "created_at,author_id,entities,text".to_string(),
                ),
                ("expansions", "author_id".to_string()),
                ("user.fields", "username".to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(XApiError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(XApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let parsed: TweetLookupResponse = serde_json::from_str(&body)?;
        Ok(join_authors(parsed))
    }
}

/// Join tweets with author usernames from the `includes.users` expansion
/// and flatten entity annotations.
fn join_authors(response: TweetLookupResponse) -> Vec<HydratedTweet> {
    let users: HashMap<String, String> = response
        .includes
        .map(|inc| inc.users.into_iter().map(|u| (u.id, u.username)).collect())
        .unwrap_or_default();

    if !response.errors.is_empty() {
        debug!(
            unresolved = response.errors.len(),
            "Some ids could not be resolved"
        );
    }

    response
        .data
        .into_iter()
        .map(|t| {
            let author_username = t.author_id.as_ref().and_then(|id| users.get(id).cloned());
            let entities = t.entities.unwrap_or_default();
            HydratedTweet {
                id: t.id,
                text: t.text,
                author_username,
                author_id: t.author_id,
                created_at: t.created_at,
                hashtags: entities.hashtags.into_iter().map(|h| h.tag).collect(),
                mentions: entities.mentions.into_iter().map(|m| m.username).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_id_list_short_circuits() {
        let client = XApiClient::new("token");
        let tweets = client.tweets_by_ids(&[]).await.unwrap();
        assert!(tweets.is_empty());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_before_any_request() {
        let client = XApiClient::new("token");
        let ids: Vec<String> = (0..101).map(|i| i.to_string()).collect();
        let err = client.tweets_by_ids(&ids).await.unwrap_err();
        assert!(matches!(err, XApiError::BatchTooLarge(101)));
    }

    #[test]
    fn join_resolves_usernames_and_entities() {
        let body = r#"{
            "data": [
                {
                    "id": "100",
                    "text": "Full text of the tweet #rust",
                    "author_id": "7",
                    "created_at": "2024-05-01T12:00:00Z",
                    "entities": {
                        "hashtags": [{"start": 29, "end": 34, "tag": "rust"}],
                        "mentions": [{"start": 0, "end": 5, "username": "alice"}]
                    }
                },
                {"id": "200", "text": "no entities, no author"}
            ],
            "includes": {"users": [{"id": "7", "username": "bob", "name": "Bob"}]},
            "errors": [{"value": "300", "title": "Not Found Error"}]
        }"#;

        let parsed: TweetLookupResponse = serde_json::from_str(body).unwrap();
        let tweets = join_authors(parsed);

        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].id, "100");
        assert_eq!(tweets[0].author_username.as_deref(), Some("bob"));
        assert_eq!(tweets[0].hashtags, vec!["rust"]);
        assert_eq!(tweets[0].mentions, vec!["alice"]);
        assert_eq!(tweets[1].author_username, None);
        assert!(tweets[1].hashtags.is_empty());
    }

    #[test]
    fn response_without_data_parses_as_empty() {
        let parsed: TweetLookupResponse =
            serde_json::from_str(r#"{"errors": [{"value": "1"}]}"#).unwrap();
        assert!(parsed.data.is_empty());
        assert_eq!(parsed.errors.len(), 1);
        assert!(join_authors(parsed).is_empty());
    }
}
