//! # Simulated Messaging Backend
//!
//! In-process stand-in for the messaging service. It behaves like a real client at
//! the boundary: the pairing stream rotates codes and closes when they run out,
//! pairing is persisted to the credential store, uploads can be downloaded again,
//! and every outgoing message is recorded.
//!
//! The factory keeps a handle per session so local tooling and tests can drive
//! the account from the "phone" side (`complete_pairing`, `emit`, ...).

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use super::jid::{Jid, USER_SERVER};
use super::media::{direct_path_from_url, MediaKind};
use super::{
    ClientEvent, ClientFactory, Contact, GroupInfo, MediaReference, MessagingClient,
    OutgoingMessage, PairingEvent, UploadedMedia,
};
use crate::config::ClientConfig;
use crate::error::BridgeError;
use crate::store::CredentialStore;

/// Timing of the simulated service.
#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    pub code_interval: Duration,
    pub max_codes: u32,
    pub connect_delay: Duration,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            code_interval: Duration::from_secs(20),
            max_codes: 6,
            connect_delay: Duration::ZERO,
        }
    }
}

impl From<&ClientConfig> for SimulatedOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            code_interval: Duration::from_secs(config.code_interval_secs),
            max_codes: config.max_codes,
            connect_delay: Duration::from_millis(config.connect_delay_ms),
        }
    }
}

struct Inner {
    session_id: String,
    options: SimulatedOptions,
    credentials: CredentialStore,
    events: UnboundedSender<ClientEvent>,
    socket_connected: AtomicBool,
    pairing: Mutex<Option<PairingChannel>>,
    pairing_subscriptions: AtomicUsize,
    connect_calls: AtomicUsize,
    failing_connects: AtomicUsize,
    ephemeral_disables: AtomicUsize,
    uploads: Mutex<HashMap<String, Vec<u8>>>,
    sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
    contacts: Mutex<HashMap<Jid, String>>,
    groups: Mutex<HashMap<Jid, GroupInfo>>,
}

/// Sender half of the current pairing stream.
struct PairingChannel {
    generation: usize,
    tx: UnboundedSender<PairingEvent>,
}

impl Inner {
    fn require_connection(&self) -> Result<(), BridgeError> {
        if self.socket_connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }

    /// Sends one code per interval until the codes run out or pairing completes,
    /// then closes the stream. Stops without touching the channel once a newer
    /// stream replaced the one it was started for.
    async fn rotate_codes(self: Arc<Self>, generation: usize) {
        for issued in 0..self.options.max_codes {
            // no sender clone may survive the sleep
            {
                let guard = self.pairing.lock();
                let Some(channel) = guard.as_ref().filter(|c| c.generation == generation) else {
                    return;
                };
                if channel.tx.send(PairingEvent::Code(pairing_code())).is_err() {
                    break;
                }
            }
            debug!(session_id = %self.session_id, issued = issued + 1, "Issued pairing code");

            tokio::time::sleep(self.options.code_interval).await;
        }

        let mut guard = self.pairing.lock();
        if guard.as_ref().is_some_and(|c| c.generation == generation) {
            guard.take();
            info!(session_id = %self.session_id, "Pairing codes exhausted, closing stream");
        }
    }

    /// Drops the pairing sender, which ends the stream for its consumer.
    fn close_pairing(&self) {
        if self.pairing.lock().take().is_some() {
            debug!(session_id = %self.session_id, "Pairing stream closed");
        }
    }
}

fn pairing_code() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("2@{}", token)
}

/// Handle to one simulated account.
#[derive(Clone)]
pub struct SimulatedClient {
    inner: Arc<Inner>,
}

impl SimulatedClient {
    pub fn new(
        session_id: &str,
        options: SimulatedOptions,
        credentials: CredentialStore,
        events: UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.to_string(),
                options,
                credentials,
                events,
                socket_connected: AtomicBool::new(false),
                pairing: Mutex::new(None),
                pairing_subscriptions: AtomicUsize::new(0),
                connect_calls: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                ephemeral_disables: AtomicUsize::new(0),
                uploads: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
                contacts: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The phone scanned the current code: persist an identity for `phone` and
    /// signal success on the pairing stream.
    pub fn complete_pairing(&self, phone: &str) -> Result<Jid, BridgeError> {
        let tx = self
            .inner
            .pairing
            .lock()
            .take()
            .map(|channel| channel.tx)
            .ok_or_else(|| BridgeError::Protocol("no pairing in progress".to_string()))?;

        let identity = Jid {
            user: phone.trim_start_matches('+').to_string(),
            device: Some(rand::thread_rng().gen_range(1..=20)),
            server: USER_SERVER.to_string(),
        };
        self.inner.credentials.save_identity(&identity)?;
        let _ = tx.send(PairingEvent::Success);

        info!(session_id = %self.inner.session_id, identity = %identity, "Simulated pairing completed");
        Ok(identity)
    }

    /// Deliver an event as if it came from the service.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.inner.events.send(event);
    }

    pub fn set_socket_connected(&self, connected: bool) {
        self.inner.socket_connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn add_contact(&self, jid: &Jid, name: &str) {
        self.inner
            .contacts
            .lock()
            .insert(jid.to_non_device(), name.to_string());
    }

    /// Join a group, or rename one already joined.
    pub fn add_group(&self, jid: &Jid, subject: &str) {
        let jid = jid.to_non_device();
        self.inner
            .groups
            .lock()
            .entry(jid.clone())
            .and_modify(|group| group.name = subject.to_string())
            .or_insert_with(|| GroupInfo {
                jid,
                name: subject.to_string(),
                participants: Vec::new(),
            });
    }

    pub fn add_group_participant(&self, group: &Jid, member: &Jid) {
        if let Some(info) = self.inner.groups.lock().get_mut(&group.to_non_device()) {
            info.participants.push(member.to_non_device());
        }
    }

    pub fn pairing_subscriptions(&self) -> usize {
        self.inner.pairing_subscriptions.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn ephemeral_disables(&self) -> usize {
        self.inner.ephemeral_disables.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.inner.sent.lock().clone()
    }
}

#[async_trait]
impl MessagingClient for SimulatedClient {
    async fn connect(&self) -> Result<(), BridgeError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.inner.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(BridgeError::Connection(
                "simulated transport refused the connection".to_string(),
            ));
        }

        if !self.inner.options.connect_delay.is_zero() {
            tokio::time::sleep(self.inner.options.connect_delay).await;
        }

        self.inner.socket_connected.store(true, Ordering::SeqCst);
        let _ = self.inner.events.send(ClientEvent::Connected);

        let generation = match self.inner.pairing.lock().as_ref() {
            Some(channel) if !self.inner.credentials.has_credential() => Some(channel.generation),
            _ => None,
        };
        if let Some(generation) = generation {
            tokio::spawn(self.inner.clone().rotate_codes(generation));
        }

        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.socket_connected.store(false, Ordering::SeqCst);
        self.inner.close_pairing();
    }

    fn is_connected(&self) -> bool {
        self.inner.socket_connected.load(Ordering::SeqCst)
    }

    fn has_stored_credential(&self) -> bool {
        self.inner.credentials.has_credential()
    }

    fn identity(&self) -> Option<Jid> {
        self.inner.credentials.identity()
    }

    async fn pairing_events(&self) -> Result<UnboundedReceiver<PairingEvent>, BridgeError> {
        if self.inner.credentials.has_credential() {
            return Err(BridgeError::Protocol(
                "pairing stream requested for a paired account".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.inner.pairing_subscriptions.fetch_add(1, Ordering::SeqCst);
        *self.inner.pairing.lock() = Some(PairingChannel { generation, tx });
        Ok(rx)
    }

    async fn logout(&self) -> Result<(), BridgeError> {
        self.inner.require_connection()?;
        self.inner.credentials.clear()?;
        self.inner.socket_connected.store(false, Ordering::SeqCst);
        self.inner.close_pairing();
        Ok(())
    }

    async fn disable_ephemeral_timer(&self) -> Result<(), BridgeError> {
        self.inner.require_connection()?;
        self.inner.ephemeral_disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<String, BridgeError> {
        self.inner.require_connection()?;
        self.inner.sent.lock().push((to.clone(), message));
        Ok(Uuid::new_v4().simple().to_string().to_uppercase())
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, BridgeError> {
        self.inner.require_connection()?;

        let direct_path = format!("/v/t62.{}/{}.enc", kind.as_str(), Uuid::new_v4().simple());
        let mut media_key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut media_key);

        let uploaded = UploadedMedia {
            url: format!("https://mmg.whatsapp.net{}?ccb=11-4", direct_path),
            direct_path: direct_path.clone(),
            media_key,
            file_length: data.len() as u64,
        };
        self.inner.uploads.lock().insert(direct_path, data);
        Ok(uploaded)
    }

    async fn download(&self, media: &MediaReference) -> Result<Vec<u8>, BridgeError> {
        self.inner.require_connection()?;

        let direct_path = if media.direct_path.is_empty() {
            direct_path_from_url(&media.url)
        } else {
            media.direct_path.clone()
        };

        self.inner
            .uploads
            .lock()
            .get(&direct_path)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("media {}", direct_path)))
    }

    async fn contact_name(&self, jid: &Jid) -> Option<String> {
        self.inner.contacts.lock().get(&jid.to_non_device()).cloned()
    }

    async fn group_name(&self, jid: &Jid) -> Result<Option<String>, BridgeError> {
        Ok(self
            .inner
            .groups
            .lock()
            .get(&jid.to_non_device())
            .map(|group| group.name.clone()))
    }

    async fn contacts(&self) -> Result<Vec<Contact>, BridgeError> {
        let mut contacts: Vec<_> = self
            .inner
            .contacts
            .lock()
            .iter()
            .map(|(jid, name)| Contact {
                jid: jid.clone(),
                name: name.clone(),
            })
            .collect();
        contacts.sort_by_key(|c| c.jid.to_string());
        Ok(contacts)
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>, BridgeError> {
        self.inner.require_connection()?;
        let mut groups: Vec<_> = self.inner.groups.lock().values().cloned().collect();
        groups.sort_by_key(|g| g.jid.to_string());
        Ok(groups)
    }

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo, BridgeError> {
        self.inner.require_connection()?;
        self.inner
            .groups
            .lock()
            .get(&jid.to_non_device())
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("group {}", jid)))
    }

    async fn leave_group(&self, jid: &Jid) -> Result<(), BridgeError> {
        self.inner.require_connection()?;
        match self.inner.groups.lock().remove(&jid.to_non_device()) {
            Some(_) => {
                info!(session_id = %self.inner.session_id, group = %jid, "Left group");
                Ok(())
            }
            None => Err(BridgeError::NotFound(format!("group {}", jid))),
        }
    }
}

/// Creates one `SimulatedClient` per session and keeps a handle to each.
pub struct SimulatedClientFactory {
    options: SimulatedOptions,
    clients: Mutex<HashMap<String, SimulatedClient>>,
}

impl SimulatedClientFactory {
    pub fn new(options: SimulatedOptions) -> Self {
        Self {
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Control handle for a session's client, once the session exists.
    pub fn client(&self, session_id: &str) -> Option<SimulatedClient> {
        self.clients.lock().get(session_id).cloned()
    }
}

impl ClientFactory for SimulatedClientFactory {
    fn create(
        &self,
        session_id: &str,
        credentials: CredentialStore,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<Arc<dyn MessagingClient>, BridgeError> {
        let client = SimulatedClient::new(session_id, self.options.clone(), credentials, events);
        self.clients
            .lock()
            .insert(session_id.to_string(), client.clone());
        Ok(Arc::new(client))
    }
}
