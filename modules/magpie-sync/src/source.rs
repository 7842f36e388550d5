//! Upstream bookmark producer seam. The collector itself is opaque — all we
//! require is a sequence of raw record values in the shape of
//! `BookmarkRecord`.

use async_trait::async_trait;
use tracing::debug;

use magpie_common::MagpieError;

use crate::state::compare_ids;

#[async_trait]
pub trait BookmarkSource: Send + Sync {
    /// Fetch raw record values. `cursor` means "records newer than this";
    /// `None` means everything the producer has.
    async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<serde_json::Value>, MagpieError>;
}

/// Reads a bookmark export file: either a JSON array of records or NDJSON,
/// one record per line. Cursor filtering happens here since a file producer
/// cannot filter server-side.
pub struct JsonFileSource {
    path: std::path::PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl BookmarkSource for JsonFileSource {
    async fn fetch(&self, cursor: Option<&str>) -> Result<Vec<serde_json::Value>, MagpieError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MagpieError::Validation(format!(
                "cannot read bookmark export {}: {e}",
                self.path.display()
            ))
        })?;

        let values = parse_export(&raw)?;
        let total = values.len();
        let values: Vec<_> = match cursor {
            Some(cursor) => values
                .into_iter()
                .filter(|v| {
                    // Values without a usable id pass through so the
                    // validation boundary can reject and count them.
                    v.get("id")
                        .and_then(|id| id.as_str())
                        .is_none_or(|id| compare_ids(id, cursor).is_gt())
                })
                .collect(),
            None => values,
        };
        debug!(
            total,
            after_cursor = values.len(),
            path = %self.path.display(),
            "Bookmark export read"
        );
        Ok(values)
    }
}

fn parse_export(raw: &str) -> Result<Vec<serde_json::Value>, MagpieError> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).map_err(MagpieError::from))
            .collect()
    }
}
