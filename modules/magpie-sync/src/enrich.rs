//! Enrichment controller: finds tweets still marked truncated and repairs
//! them from the authoritative hydration source, batch by batch.

use std::sync::Arc;

use tracing::{info, warn};

use magpie_common::{EnrichmentUpdate, MagpieError};
use xapi_client::HydratedTweet;

use crate::hydrator::TweetHydrator;
use crate::store::BookmarkStore;

/// The X API caps batch lookups at 100 ids.
pub const MAX_ENRICH_BATCH: usize = 100;

#[derive(Debug, Default)]
pub struct EnrichStats {
    pub candidates: usize,
    pub enriched: usize,
    pub failed: usize,
    pub rate_limited: bool,
}

impl std::fmt::Display for EnrichStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Enrichment Run Complete ===")?;
        writeln!(f, "Candidates: {}", self.candidates)?;
        writeln!(f, "Enriched:   {}", self.enriched)?;
        writeln!(f, "Failed:     {}", self.failed)?;
        if self.rate_limited {
            writeln!(f, "Stopped early: rate limited (remaining items resume next run)")?;
        }
        Ok(())
    }
}

pub struct EnrichmentController {
    store: Arc<dyn BookmarkStore>,
    hydrator: Arc<dyn TweetHydrator>,
    batch_size: usize,
}

impl EnrichmentController {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        hydrator: Arc<dyn TweetHydrator>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            hydrator,
            batch_size: batch_size.clamp(1, MAX_ENRICH_BATCH),
        }
    }

    /// Ids of tweets awaiting enrichment.
    pub async fn find_truncated(&self, limit: usize) -> Result<Vec<String>, MagpieError> {
        self.store.truncated_ids(limit).await
    }

    /// Enrich up to `limit` truncated tweets.
    ///
    /// A rate-limit signal stops further batches this run — the remaining
    /// items stay truncated and resume next run. Any other batch error
    /// counts the whole batch failed and moves on; one bad batch never
    /// aborts the run.
    pub async fn run(&self, limit: usize) -> Result<EnrichStats, MagpieError> {
        let candidates = self.find_truncated(limit).await?;
        let mut stats = EnrichStats {
            candidates: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            info!("No truncated tweets to enrich");
            return Ok(stats);
        }
        info!(
            candidates = candidates.len(),
            batch_size = self.batch_size,
            "Enriching truncated tweets"
        );

        for batch in candidates.chunks(self.batch_size) {
            match self.hydrator.tweets_by_ids(batch).await {
                Ok(tweets) => self.apply_batch(batch, tweets, &mut stats).await,
                Err(MagpieError::RateLimited(source)) => {
                    warn!(%source, "Rate limited, stopping enrichment for this run");
                    stats.rate_limited = true;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, batch = batch.len(), "Batch hydration failed, continuing");
                    stats.failed += batch.len();
                }
            }
        }

        info!(
            enriched = stats.enriched,
            failed = stats.failed,
            rate_limited = stats.rate_limited,
            "Enrichment run finished"
        );
        Ok(stats)
    }

    async fn apply_batch(&self, batch: &[String], tweets: Vec<HydratedTweet>, stats: &mut EnrichStats) {
        let mut by_id: std::collections::HashMap<String, HydratedTweet> =
            tweets.into_iter().map(|t| (t.id.clone(), t)).collect();

        for id in batch {
            let Some(tweet) = by_id.remove(id) else {
                // Deleted or protected — the source will never resolve it.
                warn!(%id, "Hydration source did not return tweet");
                stats.failed += 1;
                continue;
            };
            match self.store.apply_enrichment(&to_update(tweet)).await {
                Ok(()) => stats.enriched += 1,
                Err(e) => {
                    warn!(%id, error = %e, "Failed to store enrichment");
                    stats.failed += 1;
                }
            }
        }
    }
}

fn to_update(tweet: HydratedTweet) -> EnrichmentUpdate {
    EnrichmentUpdate {
        id: tweet.id,
        text: tweet.text,
        author_id: tweet.author_id,
        author_username: tweet.author_username,
        hashtags: tweet.hashtags.into_iter().map(|h| h.to_lowercase()).collect(),
        mentions: tweet.mentions.into_iter().map(|m| m.to_lowercase()).collect(),
    }
}
