use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Run idempotent schema migrations: constraints and the embedding index.
/// `IF NOT EXISTS` covers most re-runs; the "already exists" guard covers
/// servers that report an equivalent schema rule instead.
pub async fn migrate(client: &GraphClient, embedding_dimensions: usize) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT tweet_id IF NOT EXISTS FOR (t:Tweet) REQUIRE t.id IS UNIQUE",
        "CREATE CONSTRAINT user_username IF NOT EXISTS FOR (u:User) REQUIRE u.username IS UNIQUE",
        "CREATE CONSTRAINT hashtag_tag IF NOT EXISTS FOR (h:Hashtag) REQUIRE h.tag IS UNIQUE",
        "CREATE CONSTRAINT theme_name IF NOT EXISTS FOR (t:Theme) REQUIRE t.name IS UNIQUE",
        "CREATE CONSTRAINT entity_name IF NOT EXISTS FOR (e:Entity) REQUIRE e.name IS UNIQUE",
        "CREATE CONSTRAINT url_address IF NOT EXISTS FOR (u:Url) REQUIRE u.address IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Uniqueness constraints created");

    let truncated_index = "CREATE INDEX tweet_truncated IF NOT EXISTS FOR (t:Tweet) ON (t.truncated)";
    run_ignoring_exists(g, truncated_index).await?;
    info!("Property indexes created");

    // Dimension comes from the embedding config, so a provider switch that
    // changes dimensionality needs a manual index drop first.
    let vector_index = format!(
        "CREATE VECTOR INDEX tweet_embedding_index IF NOT EXISTS
         FOR (t:Tweet) ON t.embedding
         OPTIONS {{indexConfig: {{
             `vector.dimensions`: {embedding_dimensions},
             `vector.similarity_function`: 'cosine'
         }}}}"
    );
    run_ignoring_exists(g, &vector_index).await?;
    info!(dimensions = embedding_dimensions, "Vector index created");

    info!("Schema migration complete");
    Ok(())
}

/// Run a Cypher statement, ignoring errors that indicate the constraint/index already exists.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!(
                    "Already exists (skipped): {}",
                    cypher.chars().take(80).collect::<String>()
                );
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
