//! # Session Registry
//!
//! Process-wide directory of sessions keyed by account id. A session is created the
//! first time its id is referenced and lives until shutdown; there is exactly one
//! `Session` per id.
//!
//! ## On-Disk Layout:
//! ```text
//! {store_dir}/
//!   {session_id}/
//!     device.json     credential marker, present for every known session
//!     messages.db     chat history
//!     media/          downloaded attachments
//! ```

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::client::ClientFactory;
use crate::error::BridgeError;
use crate::session::{PairingState, Session};
use crate::store::CredentialStore;
use crate::webhook::WebhookNotifier;

/// What `restore_all` found on disk.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RestoreSummary {
    pub restored: Vec<String>,
    /// Sessions with stored credentials; a background connect was started for each
    pub auto_connected: Vec<String>,
    /// `(session_id, reason)`
    pub failed: Vec<(String, String)>,
}

/// Aggregate counts for health reporting.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SessionCounts {
    pub total: usize,
    pub paired: usize,
    pub socket_connected: usize,
}

/// Session ids name directories, so anything path-like is refused.
pub fn validate_session_id(id: &str) -> Result<(), BridgeError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(BridgeError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}

pub struct SessionRegistry {
    store_dir: PathBuf,
    factory: Arc<dyn ClientFactory>,
    webhook: Option<Arc<WebhookNotifier>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(
        store_dir: impl Into<PathBuf>,
        factory: Arc<dyn ClientFactory>,
        webhook: Option<Arc<WebhookNotifier>>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            factory,
            webhook,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The session for `id`, created on first use.
    ///
    /// Concurrent callers with the same new id all receive the same instance.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Session>, BridgeError> {
        validate_session_id(id)?;

        if let Some(session) = self.sessions.read().get(id) {
            return Ok(session.clone());
        }

        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(id) {
            return Ok(session.clone());
        }

        let session = Session::open(
            id,
            self.store_dir.join(id),
            self.factory.as_ref(),
            self.webhook.clone(),
        )?;
        sessions.insert(id.to_string(), session.clone());
        info!(session_id = %id, total = sessions.len(), "Registered session");
        Ok(session)
    }

    /// Lookup without creating.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Sorted ids of all sessions.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn counts(&self) -> SessionCounts {
        let sessions = self.snapshot();
        SessionCounts {
            total: sessions.len(),
            paired: sessions
                .iter()
                .filter(|s| s.state() == PairingState::Paired)
                .count(),
            socket_connected: sessions
                .iter()
                .filter(|s| s.client().is_connected())
                .count(),
        }
    }

    /// Re-open every session found under the store directory.
    ///
    /// Sessions with stored credentials are connected in the background. A broken
    /// session directory is logged and skipped.
    pub fn restore_all(&self) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        let entries = match std::fs::read_dir(&self.store_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(store_dir = %self.store_dir.display(), "No session store yet");
                return summary;
            }
            Err(e) => {
                error!(store_dir = %self.store_dir.display(), error = %e, "Cannot read session store");
                return summary;
            }
        };

        let mut candidates: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir() && CredentialStore::exists_in(&entry.path()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        candidates.sort();

        for id in candidates {
            let session = match self.get_or_create(&id) {
                Ok(session) => session,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to restore session");
                    summary.failed.push((id, e.to_string()));
                    continue;
                }
            };

            if session.client().has_stored_credential() {
                let background = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = background.connect().await {
                        warn!(session_id = %background.id(), error = %e, "Auto-connect failed");
                    }
                });
                summary.auto_connected.push(id.clone());
            }
            summary.restored.push(id);
        }

        info!(
            restored = summary.restored.len(),
            auto_connected = summary.auto_connected.len(),
            failed = summary.failed.len(),
            "Session restore complete"
        );
        summary
    }

    /// Close every transport. Called once at process exit.
    pub async fn shutdown(&self) {
        let sessions = self.snapshot();
        info!(count = sessions.len(), "Disconnecting sessions");
        for session in sessions {
            session.shutdown().await;
        }
    }
}
