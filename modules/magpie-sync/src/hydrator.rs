//! Hydration seam for the authoritative enrichment source (X API v2).

use async_trait::async_trait;

use magpie_common::MagpieError;
use xapi_client::{HydratedTweet, XApiClient, XApiError};

#[async_trait]
pub trait TweetHydrator: Send + Sync {
    /// Resolve up to one batch of tweet ids. Ids the source cannot resolve
    /// (deleted, protected) are simply absent from the result.
    async fn tweets_by_ids(&self, ids: &[String]) -> Result<Vec<HydratedTweet>, MagpieError>;
}

#[async_trait]
impl TweetHydrator for XApiClient {
    async fn tweets_by_ids(&self, ids: &[String]) -> Result<Vec<HydratedTweet>, MagpieError> {
        XApiClient::tweets_by_ids(self, ids)
            .await
            .map_err(hydration_error)
    }
}

fn hydration_error(err: XApiError) -> MagpieError {
    match err {
        XApiError::RateLimited => MagpieError::RateLimited("X API".to_string()),
        XApiError::Network(msg) => MagpieError::TransientNetwork(msg),
        XApiError::Api { status, message } if status >= 500 => {
            MagpieError::TransientNetwork(format!("X API {status}: {message}"))
        }
        XApiError::Api { status, message } => {
            MagpieError::Validation(format!("X API {status}: {message}"))
        }
        XApiError::Parse(msg) => MagpieError::Validation(format!("X API response: {msg}")),
        XApiError::BatchTooLarge(n) => {
            MagpieError::Validation(format!("hydration batch of {n} ids exceeds the API limit"))
        }
    }
}
