use std::collections::BTreeSet;

use neo4rs::query;

use crate::GraphClient;

/// Read-side queries the pipeline needs. The query/visualization API has its
/// own consumers; nothing here serves it.
pub struct GraphReader {
    client: GraphClient,
}

/// Node counts by label plus the total relationship count.
#[derive(Debug, Default, Clone)]
pub struct GraphStats {
    pub tweets: u64,
    pub users: u64,
    pub hashtags: u64,
    pub themes: u64,
    pub entities: u64,
    pub urls: u64,
    pub relationships: u64,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Graph Stats ===")?;
        writeln!(f, "Tweets:        {}", self.tweets)?;
        writeln!(f, "Users:         {}", self.users)?;
        writeln!(f, "Hashtags:      {}", self.hashtags)?;
        writeln!(f, "Themes:        {}", self.themes)?;
        writeln!(f, "Entities:      {}", self.entities)?;
        writeln!(f, "URLs:          {}", self.urls)?;
        writeln!(f, "Relationships: {}", self.relationships)?;
        Ok(())
    }
}

impl GraphReader {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Ids of tweets still marked truncated, oldest ids first.
    /// These are the enrichment candidates.
    pub async fn truncated_ids(&self, limit: usize) -> Result<Vec<String>, neo4rs::Error> {
        let q = query(
            "MATCH (t:Tweet)
             WHERE t.truncated = true
             RETURN t.id AS id
             ORDER BY id
             LIMIT $limit",
        )
        .param("limit", limit as i64);

        let mut stream = self.client.graph.execute(q).await?;
        let mut ids = Vec::new();
        while let Some(row) = stream.next().await? {
            if let Ok(id) = row.get::<String>("id") {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Ids of every fully ingested tweet. Stub nodes (created only to satisfy
    /// a reply/quote reference) have no text and are excluded — they still
    /// need processing when their own record arrives.
    ///
    /// Used to rebuild the dedup seen-set when the state file is lost; the
    /// graph is the source of truth.
    pub async fn stored_ids(&self) -> Result<BTreeSet<String>, neo4rs::Error> {
        let q = query(
            "MATCH (t:Tweet)
             WHERE t.text IS NOT NULL AND t.text <> ''
             RETURN t.id AS id",
        );

        let mut stream = self.client.graph.execute(q).await?;
        let mut ids = BTreeSet::new();
        while let Some(row) = stream.next().await? {
            if let Ok(id) = row.get::<String>("id") {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Node counts by label plus the total relationship count.
    pub async fn stats(&self) -> Result<GraphStats, neo4rs::Error> {
        Ok(GraphStats {
            tweets: self.count("MATCH (n:Tweet) RETURN count(n) AS c").await?,
            users: self.count("MATCH (n:User) RETURN count(n) AS c").await?,
            hashtags: self.count("MATCH (n:Hashtag) RETURN count(n) AS c").await?,
            themes: self.count("MATCH (n:Theme) RETURN count(n) AS c").await?,
            entities: self.count("MATCH (n:Entity) RETURN count(n) AS c").await?,
            urls: self.count("MATCH (n:Url) RETURN count(n) AS c").await?,
            relationships: self.count("MATCH ()-[r]->() RETURN count(r) AS c").await?,
        })
    }

    async fn count(&self, cypher: &str) -> Result<u64, neo4rs::Error> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        let mut count = 0i64;
        while let Some(row) = stream.next().await? {
            count = row.get("c").unwrap_or(0);
        }
        Ok(count.max(0) as u64)
    }
}
