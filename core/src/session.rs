//! Credentials, sessions and their durable storage.
//!
//! # Design
//! A `Session` is handed explicitly to every authenticated call; nothing in
//! the crate reads a process-wide token. `CredentialStore` is the durable
//! key-value side: it is written after a successful login or registration
//! and read once to restore a session on startup.
//!
//! The file store keeps the same two keys the browser client used
//! (`access_token`, `username`) in a small JSON document.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, Result};

/// Bearer token plus the username it was issued for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub username: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// Authenticated context passed into each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    credential: Credential,
}

impl Session {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn username(&self) -> &str {
        &self.credential.username
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.credential.access_token)
    }
}

/// Durable storage for the current credential.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn load(&self) -> Result<Option<Credential>> {
        (**self).load()
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        (**self).save(credential)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

/// In-memory store for tests and short-lived tools.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<Mutex<Option<Credential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Credential>>> {
        self.inner
            .lock()
            .map_err(|_| ApiError::Storage("credential lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.slot()? = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot()? = None;
        Ok(())
    }
}

/// JSON file on disk, typically `<data_dir>/vinca/credentials.json`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ApiError::Storage(e.to_string())),
        };
        let credential = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::Storage(format!("{}: {e}", self.path.display())))?;
        Ok(Some(credential))
    }

    /// Writes an owner-only temp file beside the target, then renames it over
    /// the target.
    fn save(&self, credential: &Credential) -> Result<()> {
        let storage_err = |e: std::io::Error| ApiError::Storage(format!("{}: {e}", self.path.display()));
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(storage_err)?;

        let raw = serde_json::to_vec_pretty(credential)
            .map_err(|e| ApiError::Serialization(e.to_string()))?;
        let mut file = tempfile::NamedTempFile::new_in(parent).map_err(storage_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(storage_err)?;
        }
        file.write_all(&raw).map_err(storage_err)?;
        file.as_file().sync_all().map_err(storage_err)?;
        file.persist(&self.path).map_err(|e| storage_err(e.error))?;

        debug!(path = %self.path.display(), username = %credential.username, "credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Credential {
        Credential {
            access_token: "abc".to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn session_builds_bearer_header() {
        let session = Session::new(alice());
        assert_eq!(session.authorization(), "Bearer abc");
        assert_eq!(session.username(), "alice");
    }

    #[test]
    fn debug_output_hides_token() {
        let printed = format!("{:?}", alice());
        assert!(!printed.contains("abc"));
        assert!(printed.contains("alice"));
    }

    #[test]
    fn memory_store_save_load_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&alice()).unwrap();
        assert_eq!(store.load().unwrap(), Some(alice()));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_persists_under_browser_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/credentials.json"));
        assert!(store.load().unwrap().is_none());

        store.save(&alice()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "abc");
        assert_eq!(raw["username"], "alice");

        let reopened = FileCredentialStore::new(store.path());
        assert_eq!(reopened.load().unwrap(), Some(alice()));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        std::fs::write(store.path(), "{}").unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&alice()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap(), Some(alice()));
    }

    #[test]
    fn file_store_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.save(&alice()).unwrap();
        let bob = Credential {
            access_token: "xyz".to_string(),
            username: "bob".to_string(),
        };
        store.save(&bob).unwrap();

        assert_eq!(store.load().unwrap(), Some(bob));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.clear().unwrap();
        store.save(&alice()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileCredentialStore::new(path).load().unwrap_err();
        assert!(matches!(err, ApiError::Storage(_)));
    }
}
