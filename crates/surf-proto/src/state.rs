//! Durable state: the current channel index and the credential pair.
//!
//! Both live in their own small JSON file and are written independently;
//! last writer wins.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wrap an index into `0..len`: anything at or past the end goes to the first
/// channel, anything negative to the last.
pub fn wrap_index(index: i64, len: NonZeroUsize) -> usize {
    let len = len.get();
    if index < 0 {
        len - 1
    } else if index as u64 >= len as u64 {
        0
    } else {
        index as usize
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(io_err)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring unreadable state file {}: {}", path.display(), e);
            None
        }
    }
}

// ── selection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSelection {
    #[serde(default)]
    current_channel_index: i64,
}

/// Durable pointer to the current channel.
///
/// The stored value may be out of range for the current list (it survives
/// refreshes that shrink the list); `validate` brings it back in range.
pub struct SelectionStore {
    path: PathBuf,
    index: i64,
}

impl SelectionStore {
    pub fn open(path: PathBuf) -> Self {
        let index = read_json::<PersistentSelection>(&path)
            .map(|p| p.current_channel_index)
            .unwrap_or(0);
        debug!("selection: restored index {} from {}", index, path.display());
        Self { path, index }
    }

    pub fn get(&self) -> i64 {
        self.index
    }

    /// Set and write through immediately. The in-memory value is updated even
    /// when the write fails.
    pub fn set(&mut self, index: i64) -> Result<(), StoreError> {
        self.index = index;
        write_json(
            &self.path,
            &PersistentSelection {
                current_channel_index: index,
            },
        )
    }

    /// Apply the wrap rule against a non-empty list and persist the corrected
    /// value if it changed. Returns the in-range index.
    pub fn validate(&mut self, len: NonZeroUsize) -> usize {
        let valid = wrap_index(self.index, len);
        if valid as i64 != self.index {
            debug!("selection: index {} out of range for {}, now {}", self.index, len, valid);
            if let Err(e) = self.set(valid as i64) {
                warn!("selection: {}", e);
            }
        }
        valid
    }
}

// ── credentials ───────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both halves must be present.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Stored credentials, if both halves are present.
    pub fn load(&self) -> Option<Credentials> {
        read_json::<Credentials>(&self.path).filter(Credentials::is_complete)
    }

    pub fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        write_json(&self.path, credentials)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn len(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn wrap_rule() {
        assert_eq!(wrap_index(0, len(3)), 0);
        assert_eq!(wrap_index(2, len(3)), 2);
        assert_eq!(wrap_index(3, len(3)), 0);
        assert_eq!(wrap_index(17, len(3)), 0);
        assert_eq!(wrap_index(-1, len(3)), 2);
        assert_eq!(wrap_index(i64::MIN, len(1)), 0);
    }

    #[test]
    fn selection_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut store = SelectionStore::open(path.clone());
        assert_eq!(store.get(), 0);
        store.set(7).unwrap();

        let reopened = SelectionStore::open(path);
        assert_eq!(reopened.get(), 7);
    }

    #[test]
    fn validate_persists_corrections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = SelectionStore::open(path.clone());
        store.set(-1).unwrap();
        assert_eq!(store.validate(len(4)), 3);
        assert_eq!(SelectionStore::open(path.clone()).get(), 3);

        store.set(4).unwrap();
        assert_eq!(store.validate(len(4)), 0);
        assert_eq!(SelectionStore::open(path).get(), 0);
    }

    #[test]
    fn corrupt_selection_falls_back_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SelectionStore::open(path).get(), 0);
    }

    #[test]
    fn credentials_round_trip_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        assert!(store.load().is_none());

        let creds = Credentials::new("viewer", "hunter2");
        store.save(&creds).unwrap();
        assert_eq!(store.load(), Some(creds));

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn incomplete_credentials_are_absent() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&Credentials::new("viewer", "")).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn debug_hides_password() {
        let shown = format!("{:?}", Credentials::new("viewer", "hunter2"));
        assert!(shown.contains("viewer"));
        assert!(!shown.contains("hunter2"));
    }
}
