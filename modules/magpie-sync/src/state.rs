//! Dedup and cursor state for incremental sync, persisted to a JSON file.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use magpie_common::MagpieError;

/// Ids already stored in the graph plus the high-water cursor.
///
/// The orchestrator is the single writer, and it only moves this after a
/// record is durably written. The cursor additionally never passes an id
/// that failed to store, so a crash or a failed upsert may cause
/// reprocessing but never silently loses a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub seen_ids: BTreeSet<String>,
    pub cursor: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Rebuild state from the graph's stored ids, used when the state file
    /// is lost. The cursor is re-derived as the newest seen id.
    pub fn from_seen(seen_ids: BTreeSet<String>) -> Self {
        let cursor = seen_ids
            .iter()
            .max_by(|a, b| compare_ids(a, b))
            .cloned();
        Self {
            seen_ids,
            cursor,
            last_sync: None,
        }
    }

    pub fn is_new(&self, id: &str) -> bool {
        !self.seen_ids.contains(id)
    }

    /// Record a durably written id and lift the cursor if it is newer.
    pub fn mark_seen(&mut self, id: &str) {
        self.seen_ids.insert(id.to_string());
        self.lift_cursor(id);
    }

    /// Lift the cursor to `id` if it is newer; never moves backwards.
    /// Callers must only lift past ids whose records are durably stored —
    /// anything at or below the cursor is not fetched again incrementally.
    pub fn lift_cursor(&mut self, id: &str) {
        let newer = match &self.cursor {
            Some(cursor) => compare_ids(id, cursor).is_gt(),
            None => true,
        };
        if newer {
            self.cursor = Some(id.to_string());
        }
    }

    /// The high-water mark, meaning "fetch records newer than this".
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Explicit cursor override. Like `mark_seen`, only valid after the
    /// corresponding record is durably written.
    pub fn advance_cursor(&mut self, token: &str) {
        self.cursor = Some(token.to_string());
    }
}

/// Newest-id ordering: decimal snowflakes compare numerically, anything
/// else falls back to lexicographic.
pub fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Durable storage for SyncState.
pub trait SyncStateStore: Send + Sync {
    /// Load persisted state; `None` means no prior state exists (first run
    /// or lost file — the caller decides how to recover).
    fn load(&self) -> Result<Option<SyncState>, MagpieError>;
    fn persist(&self, state: &SyncState) -> Result<(), MagpieError>;
}

/// JSON file store. Persist writes to a temp file in the same directory and
/// renames over the destination, so a crash mid-write never corrupts the
/// previous state.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SyncStateStore for FileStateStore {
    fn load(&self) -> Result<Option<SyncState>, MagpieError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let state: SyncState = serde_json::from_str(&raw)?;
        debug!(
            seen = state.seen_ids.len(),
            cursor = state.cursor.as_deref().unwrap_or("-"),
            "Sync state loaded"
        );
        Ok(Some(state))
    }

    fn persist(&self, state: &SyncState) -> Result<(), MagpieError> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new_in(".")?,
        };
        tmp.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| MagpieError::Io(e.error))?;
        debug!(seen = state.seen_ids.len(), "Sync state persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_seen_lifts_numeric_cursor() {
        let mut state = SyncState::default();
        state.mark_seen("100");
        state.mark_seen("99");
        assert_eq!(state.cursor(), Some("100"), "99 < 100 numerically");
        state.mark_seen("101");
        assert_eq!(state.cursor(), Some("101"));
    }

    #[test]
    fn non_numeric_ids_compare_lexicographically() {
        let mut state = SyncState::default();
        state.mark_seen("abc");
        state.mark_seen("abd");
        state.mark_seen("abb");
        assert_eq!(state.cursor(), Some("abd"));
    }

    #[test]
    fn lift_cursor_never_moves_backwards() {
        let mut state = SyncState::default();
        state.lift_cursor("100");
        state.lift_cursor("99");
        assert_eq!(state.cursor(), Some("100"));
        assert!(state.is_new("100"), "lifting does not mark seen");
    }

    #[test]
    fn is_new_reflects_seen_set() {
        let mut state = SyncState::default();
        assert!(state.is_new("1"));
        state.mark_seen("1");
        assert!(!state.is_new("1"));
        assert!(state.is_new("2"));
    }

    #[test]
    fn advance_cursor_overrides() {
        let mut state = SyncState::default();
        state.mark_seen("500");
        state.advance_cursor("900");
        assert_eq!(state.cursor(), Some("900"));
    }

    #[test]
    fn from_seen_derives_newest_cursor() {
        let state = SyncState::from_seen(["9".to_string(), "10".to_string()].into_iter().collect());
        assert_eq!(state.cursor(), Some("10"));
        assert!(!state.is_new("9"));
    }

    #[test]
    fn round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));

        assert!(store.load().unwrap().is_none(), "missing file loads as None");

        let mut state = SyncState::default();
        state.mark_seen("42");
        state.last_sync = Some(Utc::now());
        store.persist(&state).unwrap();

        let loaded = store.load().unwrap().expect("state file exists");
        assert_eq!(loaded.seen_ids, state.seen_ids);
        assert_eq!(loaded.cursor, state.cursor);
        assert_eq!(loaded.last_sync, state.last_sync);
    }

    #[test]
    fn persist_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::new(&path);

        let mut state = SyncState::default();
        state.mark_seen("1");
        store.persist(&state).unwrap();
        state.mark_seen("2");
        store.persist(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.seen_ids.len(), 2);
        // No stray temp files left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn corrupt_state_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStateStore::new(&path);
        assert!(store.load().is_err(), "corruption must surface, not wipe state");
    }
}
