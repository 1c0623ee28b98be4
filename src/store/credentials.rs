//! # Credential Store
//!
//! Per-session device record kept as `device.json` inside the session directory.
//! The file is created on first open, so a session that was never paired still
//! leaves a marker that startup restoration can find.
//!
//! ## File Format:
//! ```json
//! {
//!   "identity": "15551234567:3@s.whatsapp.net",
//!   "paired_at": "2025-01-01T12:00:00Z",
//!   "created_at": "2025-01-01T11:59:00Z"
//! }
//! ```

use crate::client::jid::Jid;
use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const CREDENTIAL_FILE: &str = "device.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceRecord {
    identity: Option<String>,
    paired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl DeviceRecord {
    fn fresh() -> Self {
        Self {
            identity: None,
            paired_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Shared handle to one session's device record. Clones see the same record.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    record: Arc<Mutex<DeviceRecord>>,
}

impl CredentialStore {
    /// Open `session_dir/device.json`, creating an empty record when it is missing.
    ///
    /// ## Errors:
    /// - `Storage` when the file cannot be read, written or parsed
    pub fn open_or_create(session_dir: &Path) -> Result<Self, BridgeError> {
        let path = session_dir.join(CREDENTIAL_FILE);

        let record = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| BridgeError::storage(&format!("read {}", path.display()), e))?;
            serde_json::from_str::<DeviceRecord>(&raw)
                .map_err(|e| BridgeError::storage(&format!("parse {}", path.display()), e))?
        } else {
            let record = DeviceRecord::fresh();
            write_record(&path, &record)?;
            debug!(path = %path.display(), "Created credential store");
            record
        };

        Ok(Self {
            path,
            record: Arc::new(Mutex::new(record)),
        })
    }

    /// Whether `dir` looks like a session directory.
    pub fn exists_in(dir: &Path) -> bool {
        dir.join(CREDENTIAL_FILE).is_file()
    }

    /// True once a pairing has been persisted.
    pub fn has_credential(&self) -> bool {
        self.record.lock().identity.is_some()
    }

    pub fn identity(&self) -> Option<Jid> {
        self.record
            .lock()
            .identity
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }

    /// Persist a successful pairing.
    pub fn save_identity(&self, identity: &Jid) -> Result<(), BridgeError> {
        let mut record = self.record.lock();
        let mut updated = record.clone();
        updated.identity = Some(identity.to_string());
        updated.paired_at = Some(Utc::now());
        write_record(&self.path, &updated)?;
        *record = updated;
        Ok(())
    }

    /// Forget the pairing. The file stays so the session is still restored.
    pub fn clear(&self) -> Result<(), BridgeError> {
        let mut record = self.record.lock();
        let mut updated = record.clone();
        updated.identity = None;
        updated.paired_at = None;
        write_record(&self.path, &updated)?;
        *record = updated;
        Ok(())
    }
}

fn write_record(path: &Path, record: &DeviceRecord) -> Result<(), BridgeError> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| BridgeError::storage("encode device record", e))?;

    // write to temp, then rename
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json)
        .map_err(|e| BridgeError::storage(&format!("write {}", temp_path.display()), e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| BridgeError::storage(&format!("replace {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_created_on_first_open() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::open_or_create(dir.path()).unwrap();
        assert!(CredentialStore::exists_in(dir.path()));
        assert!(!store.has_credential());
        assert!(store.identity().is_none());
    }

    #[test]
    fn test_identity_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let jid: Jid = "15551234567:4@s.whatsapp.net".parse().unwrap();

        let store = CredentialStore::open_or_create(dir.path()).unwrap();
        store.save_identity(&jid).unwrap();
        let raw = fs::read_to_string(dir.path().join(CREDENTIAL_FILE)).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&raw).unwrap()["paired_at"].is_string());

        let reopened = CredentialStore::open_or_create(dir.path()).unwrap();
        assert!(reopened.has_credential());
        assert_eq!(reopened.identity(), Some(jid));

        reopened.clear().unwrap();
        let again = CredentialStore::open_or_create(dir.path()).unwrap();
        assert!(!again.has_credential());
    }

    #[test]
    fn test_clones_share_record() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::open_or_create(dir.path()).unwrap();
        let other = store.clone();
        store.save_identity(&Jid::personal("15550000000")).unwrap();
        assert!(other.has_credential());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CREDENTIAL_FILE), "{ not json").unwrap();
        let err = CredentialStore::open_or_create(dir.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Storage(_)));
    }
}
