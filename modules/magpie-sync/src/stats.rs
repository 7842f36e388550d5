/// Stats from a sync run. Every failure mode surfaces here so an operator
/// never needs the logs to see what happened.
#[derive(Debug, Default)]
pub struct SyncStats {
    pub total_received: u32,
    pub new_stored: u32,
    pub duplicates_skipped: u32,
    pub validation_failures: u32,
    pub embedding_failures: u32,
    pub store_failures: u32,
    pub enrichment_pending: u32,
    pub cancelled: bool,
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Sync Run Complete ===")?;
        writeln!(f, "Records received:    {}", self.total_received)?;
        writeln!(f, "New stored:          {}", self.new_stored)?;
        writeln!(f, "Duplicates skipped:  {}", self.duplicates_skipped)?;
        writeln!(f, "Validation failures: {}", self.validation_failures)?;
        writeln!(f, "Embedding failures:  {}", self.embedding_failures)?;
        writeln!(f, "Store failures:      {}", self.store_failures)?;
        writeln!(f, "Enrichment pending:  {}", self.enrichment_pending)?;
        if self.cancelled {
            writeln!(f, "Run cancelled before completion")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_every_count() {
        let stats = SyncStats {
            total_received: 10,
            new_stored: 6,
            duplicates_skipped: 2,
            validation_failures: 1,
            embedding_failures: 1,
            store_failures: 0,
            enrichment_pending: 3,
            cancelled: false,
        };
        let out = stats.to_string();
        for needle in ["10", "6", "2", "Enrichment pending:  3"] {
            assert!(out.contains(needle), "missing {needle} in {out}");
        }
        assert!(!out.contains("cancelled"));
    }
}
