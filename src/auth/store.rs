//! Local key/value storage for session persistence.
//!
//! One JSON file per key under the platform data directory; the on-disk
//! slot where the dashboard keeps its session record between runs.
//! Storage failures are logged and swallowed: a read that fails behaves
//! exactly like an absent key, so callers never branch on I/O errors.

use std::path::PathBuf;

use tracing::warn;

use crate::auth::session::{Session, SESSION_KEY};

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Persist a string value under `key`, replacing any previous value.
    pub fn save(&self, key: &str, value: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(key, error = %e, "Failed to create storage directory");
            return;
        }
        if let Err(e) = std::fs::write(self.entry_path(key), value) {
            warn!(key, error = %e, "Failed to write storage entry");
        }
    }

    /// Read the value stored under `key`. Absent and unreadable entries
    /// both come back as `None`.
    pub fn read(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                warn!(key, error = %e, "Failed to read storage entry");
                None
            }
        }
    }

    /// Remove the value stored under `key`, if any.
    pub fn delete(&self, key: &str) {
        let path = self.entry_path(key);
        if !path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(key, error = %e, "Failed to delete storage entry");
        }
    }

    // ===== Session record =====

    pub fn save_session(&self, session: &Session) {
        match serde_json::to_string_pretty(session) {
            Ok(contents) => self.save(SESSION_KEY, &contents),
            Err(e) => warn!(error = %e, "Failed to serialize session record"),
        }
    }

    /// Load the persisted session record. A corrupt record reads as absent.
    pub fn load_session(&self) -> Option<Session> {
        let contents = self.read(SESSION_KEY)?;
        match serde_json::from_str(&contents) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Failed to parse session record");
                None
            }
        }
    }

    pub fn clear_session(&self) {
        self.delete(SESSION_KEY);
    }

    /// Token of the persisted session, if one exists.
    pub fn stored_token(&self) -> Option<String> {
        self.load_session().map(|s| s.token)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::Principal;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("storage"));
        (dir, store)
    }

    #[test]
    fn test_save_read_round_trip() {
        let (_dir, store) = store();
        store.save("user", "{\"hello\":true}");
        assert_eq!(store.read("user").as_deref(), Some("{\"hello\":true}"));
    }

    #[test]
    fn test_read_missing_key_is_none() {
        let (_dir, store) = store();
        assert!(store.read("user").is_none());
    }

    #[test]
    fn test_delete_removes_value() {
        let (_dir, store) = store();
        store.save("user", "value");
        store.delete("user");
        assert!(store.read("user").is_none());
    }

    #[test]
    fn test_delete_missing_key_is_quiet() {
        let (_dir, store) = store();
        store.delete("user");
        assert!(store.read("user").is_none());
    }

    #[test]
    fn test_session_round_trip_deep_equal() {
        let (_dir, store) = store();
        let principal = Principal {
            uid: "u-9".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: Some("Ada".to_string()),
            role: Some("admin".to_string()),
        };
        let session = Session::from_principal(&principal, "tok-123".to_string());

        store.save_session(&session);
        assert_eq!(store.load_session(), Some(session));
        assert_eq!(store.stored_token().as_deref(), Some("tok-123"));

        store.clear_session();
        assert!(store.load_session().is_none());
        assert!(store.stored_token().is_none());
    }

    #[test]
    fn test_corrupt_session_reads_as_absent() {
        let (_dir, store) = store();
        store.save(SESSION_KEY, "not json at all");
        assert!(store.load_session().is_none());
    }
}
