use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::debug;

use magpie_common::{BookmarkRecord, EnrichmentUpdate, ExtractedFacts};

use crate::GraphClient;

/// Write-side wrapper for the graph. Used by the sync pipeline only.
///
/// Every statement here is a MERGE on a natural key, so re-running the same
/// input never duplicates a node or an edge. `truncated` is monotonic: once a
/// Tweet carries `truncated = false`, no later write flips it back.
pub struct GraphWriter {
    client: GraphClient,
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Upsert a tweet with all of its relationships, in fixed order:
    /// tweet node, author + POSTED, fact nodes + edges, reply/quote edges.
    ///
    /// Reply and quote targets are MERGEd on their bare id — an unseen target
    /// becomes a stub node whose properties are filled in when its own record
    /// arrives. Returns the number of relationships created by this call.
    pub async fn upsert_tweet(
        &self,
        record: &BookmarkRecord,
        facts: &ExtractedFacts,
    ) -> Result<u64, neo4rs::Error> {
        let before = self.relationship_count(&record.id).await?;

        self.merge_tweet_node(record, facts).await?;

        if let Some(username) = &record.author_username {
            let username = username.to_lowercase();
            if !username.is_empty() {
                self.merge_author(&record.id, &username, record.author_id.as_deref())
                    .await?;
            }
        }

        self.merge_fact_edges(
            &record.id,
            "Hashtag",
            "tag",
            "HAS_HASHTAG",
            &collect(&facts.hashtags),
        )
        .await?;
        self.merge_fact_edges(
            &record.id,
            "User",
            "username",
            "MENTIONS",
            &collect(&facts.mentions),
        )
        .await?;
        self.merge_fact_edges(
            &record.id,
            "Entity",
            "name",
            "MENTIONS_ENTITY",
            &collect(&facts.entities),
        )
        .await?;
        self.merge_fact_edges(
            &record.id,
            "Theme",
            "name",
            "ABOUT_THEME",
            &collect(&facts.themes),
        )
        .await?;
        self.merge_fact_edges(
            &record.id,
            "Url",
            "address",
            "CONTAINS_URL",
            &collect(&facts.urls),
        )
        .await?;

        if let Some(parent) = &record.reply_to {
            self.merge_reference(&record.id, parent, "REPLY_TO").await?;
        }
        if let Some(quoted) = &record.quote_of {
            self.merge_reference(&record.id, quoted, "QUOTES").await?;
        }

        let after = self.relationship_count(&record.id).await?;
        let created = after.saturating_sub(before);
        debug!(id = %record.id, created, "Tweet upserted");
        Ok(created)
    }

    /// Overwrite a truncated tweet with its authoritative representation.
    /// Sets `truncated = false` and never the reverse; replaces the author
    /// and re-merges the hashtag/mention edges found in the hydrated
    /// entities.
    pub async fn apply_enrichment(&self, update: &EnrichmentUpdate) -> Result<(), neo4rs::Error> {
        let q = query(
            "MERGE (t:Tweet {id: $id})
             SET t.text = $text,
                 t.truncated = false,
                 t.author_username = CASE WHEN $author_username = '' THEN t.author_username ELSE $author_username END,
                 t.enriched_at = datetime()",
        )
        .param("id", update.id.as_str())
        .param("text", update.text.as_str())
        .param(
            "author_username",
            update
                .author_username
                .as_deref()
                .map(|u| u.to_lowercase())
                .unwrap_or_default(),
        );
        self.client.graph.run(q).await?;

        if let Some(username) = &update.author_username {
            let username = username.to_lowercase();
            if !username.is_empty() {
                self.replace_author(&update.id, &username, update.author_id.as_deref())
                    .await?;
            }
        }

        self.merge_fact_edges(
            &update.id,
            "Hashtag",
            "tag",
            "HAS_HASHTAG",
            &collect(&update.hashtags),
        )
        .await?;
        self.merge_fact_edges(
            &update.id,
            "User",
            "username",
            "MENTIONS",
            &collect(&update.mentions),
        )
        .await?;

        Ok(())
    }

    /// MERGE the Tweet node itself. Properties are set on create and on
    /// stub fill-in; an already-ingested tweet keeps its text (records are
    /// immutable after ingestion, enrichment goes through apply_enrichment).
    async fn merge_tweet_node(
        &self,
        record: &BookmarkRecord,
        facts: &ExtractedFacts,
    ) -> Result<(), neo4rs::Error> {
        let q = query(
            "MERGE (t:Tweet {id: $id})
             ON CREATE SET t.truncated = $truncated
             ON MATCH SET t.truncated = (coalesce(t.truncated, $truncated) AND $truncated)
             SET t.text = CASE WHEN t.text IS NULL OR t.text = '' THEN $text ELSE t.text END,
                 t.author_username = coalesce(t.author_username, $author_username),
                 t.created_at = CASE WHEN $created_at = '' THEN t.created_at ELSE datetime($created_at) END,
                 t.bookmark_url = CASE WHEN $bookmark_url = '' THEN t.bookmark_url ELSE $bookmark_url END",
        )
        .param("id", record.id.as_str())
        .param("text", record.text.as_str())
        .param("truncated", record.truncated)
        .param(
            "author_username",
            record
                .author_username
                .as_deref()
                .map(|u| u.to_lowercase())
                .unwrap_or_default(),
        )
        .param(
            "created_at",
            record
                .created_at
                .map(|dt| format_datetime(&dt))
                .unwrap_or_default(),
        )
        .param(
            "bookmark_url",
            record.bookmark_url.clone().unwrap_or_default(),
        );
        self.client.graph.run(q).await?;

        // A failed embedding leaves the property absent — the tweet stays
        // invisible to similarity search until successfully re-embedded.
        if let Some(embedding) = &facts.embedding {
            let q = query("MATCH (t:Tweet {id: $id}) SET t.embedding = $embedding")
                .param("id", record.id.as_str())
                .param("embedding", embedding_to_f64(embedding));
            self.client.graph.run(q).await?;
        }

        Ok(())
    }

    /// MERGE the author User node and its POSTED edge. The first recorded
    /// author wins: if the tweet already has a POSTED edge from a different
    /// user, no second edge is added. Only enrichment, which is
    /// authoritative, replaces the author (`replace_author`).
    async fn merge_author(
        &self,
        tweet_id: &str,
        username: &str,
        author_id: Option<&str>,
    ) -> Result<(), neo4rs::Error> {
        let q = query(
            "MERGE (u:User {username: $username})
             SET u.author_id = CASE WHEN $author_id = '' THEN u.author_id ELSE $author_id END
             WITH u
             MATCH (t:Tweet {id: $id})
             OPTIONAL MATCH (other:User)-[:POSTED]->(t)
             WHERE other <> u
             WITH u, t, count(other) AS conflicts
             WHERE conflicts = 0
             MERGE (u)-[:POSTED]->(t)",
        )
        .param("username", username)
        .param("author_id", author_id.unwrap_or_default())
        .param("id", tweet_id);
        self.client.graph.run(q).await
    }

    /// Authoritative author from enrichment: MERGE the corrected User and
    /// its POSTED edge, then drop the edge from any previously recorded
    /// author. A tweet keeps exactly one inbound POSTED edge.
    async fn replace_author(
        &self,
        tweet_id: &str,
        username: &str,
        author_id: Option<&str>,
    ) -> Result<(), neo4rs::Error> {
        let q = query(
            "MERGE (u:User {username: $username})
             SET u.author_id = CASE WHEN $author_id = '' THEN u.author_id ELSE $author_id END
             WITH u
             MATCH (t:Tweet {id: $id})
             MERGE (u)-[:POSTED]->(t)
             WITH u, t
             OPTIONAL MATCH (old:User)-[stale:POSTED]->(t)
             WHERE old <> u
             DELETE stale",
        )
        .param("username", username)
        .param("author_id", author_id.unwrap_or_default())
        .param("id", tweet_id);
        self.client.graph.run(q).await
    }

    /// MERGE one kind of fact node plus the typed edge from the tweet,
    /// batched with UNWIND.
    async fn merge_fact_edges(
        &self,
        tweet_id: &str,
        label: &str,
        key: &str,
        rel_type: &str,
        values: &[String],
    ) -> Result<(), neo4rs::Error> {
        if values.is_empty() {
            return Ok(());
        }
        let cypher = format!(
            "MATCH (t:Tweet {{id: $id}})
             UNWIND $values AS value
             MERGE (n:{label} {{{key}: value}})
             MERGE (t)-[:{rel_type}]->(n)"
        );
        let q = query(&cypher)
            .param("id", tweet_id)
            .param("values", values.to_vec());
        self.client.graph.run(q).await
    }

    /// MERGE a REPLY_TO/QUOTES edge to the referenced tweet id. The target
    /// is MERGEd on the bare id, so a forward reference creates a stub.
    async fn merge_reference(
        &self,
        tweet_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> Result<(), neo4rs::Error> {
        let cypher = format!(
            "MATCH (t:Tweet {{id: $id}})
             MERGE (target:Tweet {{id: $target}})
             MERGE (t)-[:{rel_type}]->(target)"
        );
        let q = query(&cypher)
            .param("id", tweet_id)
            .param("target", target_id);
        self.client.graph.run(q).await
    }

    /// Count the relationships this tweet's own merges are responsible for:
    /// outgoing edges plus the inbound POSTED edge. Inbound reply/quote
    /// edges belong to the referencing tweet's upsert and are excluded so a
    /// concurrent reply is never misattributed to this call.
    async fn relationship_count(&self, tweet_id: &str) -> Result<u64, neo4rs::Error> {
        let q = query(
            "OPTIONAL MATCH (:Tweet {id: $id})-[out]->()
             WITH count(out) AS outgoing
             OPTIONAL MATCH (:User)-[posted:POSTED]->(:Tweet {id: $id})
             RETURN outgoing + count(posted) AS rels",
        )
        .param("id", tweet_id);
        let mut stream = self.client.graph.execute(q).await?;
        let mut count = 0i64;
        while let Some(row) = stream.next().await? {
            count = row.get("rels").unwrap_or(0);
        }
        Ok(count.max(0) as u64)
    }
}

fn collect(set: &std::collections::BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

/// Bolt has no f32 list type; embeddings go over the wire as f64.
pub(crate) fn embedding_to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|&v| v as f64).collect()
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
