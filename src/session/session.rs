//! # Session Lifecycle
//!
//! One `Session` per account. It owns the account's messaging client and drives the
//! connect/pairing state machine:
//!
//! ## States:
//! - `Unpaired` ─connect─▶ `Connecting` ─code─▶ `AwaitingScan` ─success─▶ `Paired`
//! - `Connecting` / `AwaitingScan` ─code stream closed─▶ `Unpaired`
//! - any ─connect with stored credential─▶ `Paired`
//! - any ─logout or unlinked by the service─▶ `LoggedOut`
//!
//! ## Concurrency:
//! All state lives behind one `parking_lot::Mutex` that is never held across an
//! `.await`. Every mutation bumps a `watch` counter so waiters wake up without polling.
//! `is_connecting` admits one connect attempt at a time; a drop guard clears it on
//! every exit path.
//!
//! Each pairing flow carries a generation number. Starting a flow or logging out bumps
//! it, and a pairing task whose generation is no longer current changes nothing.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::jid::Jid;
use crate::client::{ClientFactory, MessagingClient, PairingEvent};
use crate::error::BridgeError;
use crate::session::events;
use crate::store::messages::MESSAGE_DB_FILE;
use crate::store::{CredentialStore, MessageStore};
use crate::webhook::WebhookNotifier;

/// Where the account stands in the pairing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    Unpaired,
    Connecting,
    AwaitingScan,
    Paired,
    LoggedOut,
}

impl PairingState {
    fn is_pairing(&self) -> bool {
        matches!(self, PairingState::Connecting | PairingState::AwaitingScan)
    }
}

/// What a call to `Session::connect` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// Stored credentials were used; the session is paired
    Connected,
    /// Transport is up and pairing codes will follow
    AwaitingPairing,
    /// Another connect attempt is in flight; nothing was done
    AlreadyConnecting,
    /// Transport already up with credentials or an active pairing flow
    AlreadyConnected,
}

/// Point-in-time view of a session.
///
/// `paired` is account-level authentication, `socket_connected` is the transport.
/// The two are independent.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: PairingState,
    /// Alias of `paired`
    pub connected: bool,
    pub paired: bool,
    pub socket_connected: bool,
    #[serde(rename = "qr")]
    pub pending_code: String,
    #[serde(rename = "jid")]
    pub identity: Option<Jid>,
    pub phone: Option<String>,
}

struct SessionState {
    state: PairingState,
    /// Only `Some` while `AwaitingScan`
    pending_code: Option<String>,
    is_connecting: bool,
    /// Generation of the current pairing flow
    flow: u64,
}

impl SessionState {
    fn owns_flow(&self, flow: u64) -> bool {
        self.flow == flow && self.state.is_pairing()
    }
}

pub struct Session {
    id: String,
    dir: PathBuf,
    client: Arc<dyn MessagingClient>,
    messages: MessageStore,
    webhook: Option<Arc<WebhookNotifier>>,
    state: Mutex<SessionState>,
    changes: watch::Sender<u64>,
}

/// Holds `is_connecting` for the duration of one connect attempt.
struct ConnectingGuard<'a> {
    session: &'a Session,
}

impl<'a> ConnectingGuard<'a> {
    fn acquire(session: &'a Session) -> Option<Self> {
        let mut state = session.state.lock();
        if state.is_connecting {
            return None;
        }
        state.is_connecting = true;
        Some(Self { session })
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.session.state.lock().is_connecting = false;
    }
}

impl Session {
    /// Open or create the session stored in `dir` and start its event consumer.
    ///
    /// ## Errors:
    /// - `Storage` when the directory, credential file or message database is unusable
    pub(crate) fn open(
        id: &str,
        dir: PathBuf,
        factory: &dyn ClientFactory,
        webhook: Option<Arc<WebhookNotifier>>,
    ) -> Result<Arc<Self>, BridgeError> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| BridgeError::storage(&format!("create {}", dir.display()), e))?;

        let credentials = CredentialStore::open_or_create(&dir)?;
        let messages = MessageStore::open(dir.join(MESSAGE_DB_FILE))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = factory.create(id, credentials, events_tx)?;

        let initial = if client.has_stored_credential() {
            PairingState::Paired
        } else {
            PairingState::Unpaired
        };

        let (changes, _) = watch::channel(0u64);
        let session = Arc::new(Self {
            id: id.to_string(),
            dir,
            client,
            messages,
            webhook,
            state: Mutex::new(SessionState {
                state: initial,
                pending_code: None,
                is_connecting: false,
                flow: 0,
            }),
            changes,
        });

        events::spawn_event_loop(Arc::downgrade(&session), events_rx);
        info!(session_id = %id, state = ?initial, "Session opened");
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn client(&self) -> &Arc<dyn MessagingClient> {
        &self.client
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn webhook(&self) -> Option<&Arc<WebhookNotifier>> {
        self.webhook.as_ref()
    }

    pub fn state(&self) -> PairingState {
        self.state.lock().state
    }

    pub fn is_paired(&self) -> bool {
        self.state() == PairingState::Paired
    }

    pub fn is_connecting(&self) -> bool {
        self.state.lock().is_connecting
    }

    /// Connect the account, starting a pairing flow when it has no credentials.
    ///
    /// ## Returns:
    /// - `AlreadyConnecting` immediately when another attempt is running
    /// - `AwaitingPairing` once the transport is up; codes arrive in the background
    /// - `Connected` when stored credentials were used
    ///
    /// ## Errors:
    /// - `Connection` when the transport fails; the state is left as it was
    pub async fn connect(self: &Arc<Self>) -> Result<ConnectOutcome, BridgeError> {
        let Some(_guard) = ConnectingGuard::acquire(self) else {
            debug!(session_id = %self.id, "Connect already in progress");
            return Ok(ConnectOutcome::AlreadyConnecting);
        };

        if self.client.is_connected() {
            let pairing = self.state().is_pairing();
            if self.client.has_stored_credential() || pairing {
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            debug!(session_id = %self.id, "Dropping stale transport before pairing");
            self.client.disconnect().await;
        }

        if !self.client.has_stored_credential() {
            let codes = self.client.pairing_events().await?;
            self.client.connect().await?;

            let flow = self.update(|s| {
                s.flow = s.flow.wrapping_add(1);
                s.state = PairingState::Connecting;
                s.pending_code = None;
                s.flow
            });
            info!(session_id = %self.id, flow, "Transport up, waiting for pairing codes");

            let session = Arc::clone(self);
            tokio::spawn(async move { session.consume_pairing(codes, flow).await });
            return Ok(ConnectOutcome::AwaitingPairing);
        }

        self.client.connect().await?;
        self.mark_paired();
        info!(session_id = %self.id, "Connected with stored credentials");
        self.disable_ephemeral_timer().await;
        Ok(ConnectOutcome::Connected)
    }

    /// Runs until pairing succeeds, the code stream closes or `flow` is superseded.
    async fn consume_pairing(
        self: Arc<Self>,
        mut codes: UnboundedReceiver<PairingEvent>,
        flow: u64,
    ) {
        while let Some(event) = codes.recv().await {
            let applied = match event {
                PairingEvent::Code(code) => self.update(|s| {
                    let owned = s.owns_flow(flow);
                    if owned {
                        s.state = PairingState::AwaitingScan;
                        s.pending_code = Some(code);
                    }
                    owned
                }),
                PairingEvent::Success => {
                    let paired = self.update(|s| {
                        let owned = s.owns_flow(flow);
                        if owned {
                            s.state = PairingState::Paired;
                            s.pending_code = None;
                        }
                        owned
                    });
                    if paired {
                        info!(session_id = %self.id, "Pairing succeeded");
                        self.disable_ephemeral_timer().await;
                        return;
                    }
                    false
                }
            };

            if !applied {
                debug!(session_id = %self.id, flow, "Pairing flow superseded, dropping stream");
                return;
            }
            debug!(session_id = %self.id, "Received pairing code");
        }

        let reset = self.update(|s| {
            let owned = s.owns_flow(flow);
            if owned {
                s.state = PairingState::Unpaired;
                s.pending_code = None;
            }
            owned
        });
        if reset {
            info!(session_id = %self.id, "Pairing stream closed without success");
        }
    }

    /// Best effort; failures are only logged.
    async fn disable_ephemeral_timer(&self) {
        match self.client.disable_ephemeral_timer().await {
            Ok(()) => debug!(session_id = %self.id, "Disabled default disappearing timer"),
            Err(e) => warn!(session_id = %self.id, error = %e, "Failed to disable disappearing timer"),
        }
    }

    fn mark_paired(&self) {
        self.update(|s| {
            s.state = PairingState::Paired;
            s.pending_code = None;
        });
    }

    /// The account was unlinked, by us or by the service. Ends any pairing flow.
    pub(crate) fn mark_logged_out(&self) {
        self.update(|s| {
            s.flow = s.flow.wrapping_add(1);
            s.state = PairingState::LoggedOut;
            s.pending_code = None;
        });
    }

    fn update<R>(&self, mutate: impl FnOnce(&mut SessionState) -> R) -> R {
        let result = {
            let mut state = self.state.lock();
            mutate(&mut state)
        };
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
        result
    }

    /// Wait for the first pairing code.
    ///
    /// Returns `None` when the session becomes paired or `timeout` elapses first.
    pub async fn wait_for_code(&self, timeout: Duration) -> Option<String> {
        let mut changes = self.changes.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            {
                let state = self.state.lock();
                if state.state == PairingState::Paired {
                    return None;
                }
                if let Some(code) = &state.pending_code {
                    return Some(code.clone());
                }
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                _ => return None,
            }
        }
    }

    /// Unlink the account. Never fails.
    ///
    /// ## Returns:
    /// Whether the transport was connected, i.e. whether the service was told.
    pub async fn logout(&self) -> bool {
        let was_connected = self.client.is_connected();
        if was_connected {
            if let Err(e) = self.client.logout().await {
                warn!(session_id = %self.id, error = %e, "Logout request failed");
            }
        }

        self.mark_logged_out();
        info!(session_id = %self.id, was_connected, "Session logged out");
        was_connected
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        let identity = self.client.identity();
        let paired = state.state == PairingState::Paired;

        SessionStatus {
            session_id: self.id.clone(),
            state: state.state,
            connected: paired,
            paired,
            socket_connected: self.client.is_connected(),
            pending_code: state.pending_code.clone().unwrap_or_default(),
            phone: identity.as_ref().map(Jid::phone),
            identity: identity.map(|jid| jid.to_non_device()),
        }
    }

    /// Own user part, once paired.
    pub fn own_user(&self) -> Option<String> {
        self.client.identity().map(|jid| jid.user)
    }

    pub(crate) async fn shutdown(&self) {
        if self.client.is_connected() {
            self.client.disconnect().await;
            debug!(session_id = %self.id, "Transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientEvent, SimulatedClient, SimulatedClientFactory, SimulatedOptions};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        session: Arc<Session>,
        phone: SimulatedClient,
    }

    fn harness(options: SimulatedOptions) -> Harness {
        let dir = TempDir::new().unwrap();
        let factory = SimulatedClientFactory::new(options);
        let session = Session::open("acct", dir.path().join("acct"), &factory, None).unwrap();
        let phone = factory.client("acct").unwrap();
        Harness {
            _dir: dir,
            session,
            phone,
        }
    }

    fn slow_codes() -> SimulatedOptions {
        SimulatedOptions {
            code_interval: Duration::from_secs(60),
            max_codes: 6,
            connect_delay: Duration::from_millis(20),
        }
    }

    async fn wait_for_state(session: &Session, expected: PairingState) {
        for _ in 0..200 {
            if session.state() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {:?}, stuck in {:?}", expected, session.state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_subscribe_once() {
        let h = harness(slow_codes());

        let attempts: Vec<_> = (0..10)
            .map(|_| {
                let session = h.session.clone();
                tokio::spawn(async move { session.connect().await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for attempt in attempts {
            outcomes.push(attempt.await.unwrap().unwrap());
        }

        assert_eq!(h.phone.pairing_subscriptions(), 1);
        assert_eq!(h.phone.connect_calls(), 1);
        assert!(!h.session.is_connecting());
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == ConnectOutcome::AwaitingPairing)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_pairing_success_clears_code() {
        let h = harness(slow_codes());
        assert_eq!(h.session.connect().await.unwrap(), ConnectOutcome::AwaitingPairing);

        let code = h.session.wait_for_code(Duration::from_secs(2)).await;
        assert!(code.is_some_and(|c| c.starts_with("2@")));
        assert_eq!(h.session.state(), PairingState::AwaitingScan);

        h.phone.complete_pairing("15551234567").unwrap();
        wait_for_state(&h.session, PairingState::Paired).await;

        for _ in 0..3 {
            let status = h.session.status();
            assert!(status.paired);
            assert!(status.pending_code.is_empty());
            assert_eq!(status.phone.as_deref(), Some("+15551234567"));
        }
        assert_eq!(h.phone.ephemeral_disables(), 1);
    }

    #[tokio::test]
    async fn test_stream_closure_returns_to_unpaired() {
        let h = harness(SimulatedOptions {
            code_interval: Duration::from_millis(5),
            max_codes: 2,
            connect_delay: Duration::ZERO,
        });
        h.session.connect().await.unwrap();
        wait_for_state(&h.session, PairingState::Unpaired).await;
        assert!(h.session.status().pending_code.is_empty());
    }

    #[tokio::test]
    async fn test_paired_and_socket_are_independent() {
        let h = harness(slow_codes());

        h.phone.set_socket_connected(false);
        let status = h.session.status();
        assert!(!status.paired && !status.socket_connected);

        h.phone.set_socket_connected(true);
        let status = h.session.status();
        assert!(!status.paired && status.socket_connected);

        h.session.mark_paired();
        let status = h.session.status();
        assert!(status.paired && status.socket_connected);

        h.phone.set_socket_connected(false);
        let status = h.session.status();
        assert!(status.paired && !status.socket_connected);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_state_untouched() {
        let h = harness(slow_codes());
        h.phone.fail_next_connects(1);

        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::Connection(_)));
        assert_eq!(h.session.state(), PairingState::Unpaired);
        assert!(!h.session.is_connecting());

        assert_eq!(h.session.connect().await.unwrap(), ConnectOutcome::AwaitingPairing);
    }

    #[tokio::test]
    async fn test_stored_credential_connects_directly() {
        let h = harness(slow_codes());
        h.session.connect().await.unwrap();
        h.session.wait_for_code(Duration::from_secs(2)).await;
        h.phone.complete_pairing("15550009999").unwrap();
        wait_for_state(&h.session, PairingState::Paired).await;

        h.phone.set_socket_connected(false);
        assert_eq!(h.session.connect().await.unwrap(), ConnectOutcome::Connected);
        assert_eq!(h.phone.pairing_subscriptions(), 1);
        assert_eq!(h.session.connect().await.unwrap(), ConnectOutcome::AlreadyConnected);
    }

    #[tokio::test]
    async fn test_wait_for_code_times_out() {
        let h = harness(slow_codes());
        let started = Instant::now();
        assert!(h.session.wait_for_code(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_logout_reports_transport() {
        let h = harness(slow_codes());
        assert!(!h.session.logout().await);
        assert_eq!(h.session.state(), PairingState::LoggedOut);

        h.session.connect().await.unwrap();
        h.session.wait_for_code(Duration::from_secs(2)).await;
        h.phone.complete_pairing("15550001234").unwrap();
        wait_for_state(&h.session, PairingState::Paired).await;

        assert!(h.session.logout().await);
        let status = h.session.status();
        assert_eq!(status.state, PairingState::LoggedOut);
        assert!(!status.paired);
        assert!(!h.phone.has_stored_credential());
    }

    #[tokio::test]
    async fn test_unsolicited_logout_event() {
        let h = harness(slow_codes());
        h.session.connect().await.unwrap();
        h.session.wait_for_code(Duration::from_secs(2)).await;

        h.phone.emit(ClientEvent::LoggedOut);
        wait_for_state(&h.session, PairingState::LoggedOut).await;
        assert!(h.session.status().pending_code.is_empty());
    }

    fn fast_codes() -> SimulatedOptions {
        SimulatedOptions {
            code_interval: Duration::from_millis(20),
            max_codes: 100,
            connect_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_logout_during_rotation_stays_logged_out() {
        let h = harness(fast_codes());
        h.session.connect().await.unwrap();
        assert!(h.session.wait_for_code(Duration::from_secs(2)).await.is_some());

        assert!(h.session.logout().await);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = h.session.status();
        assert_eq!(status.state, PairingState::LoggedOut);
        assert!(status.pending_code.is_empty());
        assert!(!status.socket_connected);
    }

    #[tokio::test]
    async fn test_logout_event_during_rotation_stays_logged_out() {
        let h = harness(fast_codes());
        h.session.connect().await.unwrap();
        assert!(h.session.wait_for_code(Duration::from_secs(2)).await.is_some());

        h.phone.emit(ClientEvent::LoggedOut);
        wait_for_state(&h.session, PairingState::LoggedOut).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = h.session.status();
        assert_eq!(status.state, PairingState::LoggedOut);
        assert!(status.pending_code.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_old_flow() {
        let h = harness(fast_codes());
        h.session.connect().await.unwrap();
        assert!(h.session.wait_for_code(Duration::from_secs(2)).await.is_some());

        h.phone.set_socket_connected(false);
        assert_eq!(h.session.connect().await.unwrap(), ConnectOutcome::AwaitingPairing);
        assert_eq!(h.phone.pairing_subscriptions(), 2);

        assert!(h.session.wait_for_code(Duration::from_secs(2)).await.is_some());
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            let status = h.session.status();
            assert_eq!(status.state, PairingState::AwaitingScan);
            assert!(!status.pending_code.is_empty());
        }

        h.phone.complete_pairing("15550004321").unwrap();
        wait_for_state(&h.session, PairingState::Paired).await;
    }
}
