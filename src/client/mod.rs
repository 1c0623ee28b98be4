//! # Messaging Client Boundary
//!
//! The bridge never speaks the messaging protocol itself. Each session owns one
//! `MessagingClient` built by a `ClientFactory`; the client reports what happens on
//! the account through `ClientEvent`s sent over the session's event channel.
//!
//! ## Key Components:
//! - **MessagingClient**: transport, pairing stream, send/upload/download, contacts and groups
//! - **ClientEvent**: closed set of notifications consumed by one task per session
//! - **ConversationNames**: how event records offer a name for their chat
//! - **SimulatedClient**: in-process backend for local runs and tests

pub mod jid;
pub mod media;
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::error::BridgeError;
use crate::store::CredentialStore;
use jid::Jid;
use media::MediaKind;

pub use simulated::{SimulatedClient, SimulatedClientFactory, SimulatedOptions};

/// One item of the pairing-code stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh code to render as a QR image; replaces any previous one
    Code(String),
    /// The phone scanned a code; credentials are stored
    Success,
}

/// Notifications from the client, delivered in order on the session's channel.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    MessageReceived(IncomingMessage),
    HistorySyncReceived(HistorySync),
    Connected,
    /// The account was unlinked from the phone or by the service
    LoggedOut,
}

/// Attachment metadata as delivered by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    /// Documents may carry the sender's filename
    pub file_name: Option<String>,
    pub url: String,
    pub media_key: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub chat: Jid,
    /// Sender user part
    pub sender: String,
    pub push_name: Option<String>,
    pub is_from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
}

/// A batch of past conversations pushed after pairing.
#[derive(Debug, Clone, Default)]
pub struct HistorySync {
    pub conversations: Vec<HistoryConversation>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryConversation {
    /// Raw chat address; unparseable ones are skipped
    pub id: String,
    pub display_name: Option<String>,
    pub name: Option<String>,
    /// Newest first
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryMessage {
    pub id: String,
    pub from_me: bool,
    /// Group member who sent it
    pub participant: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
}

/// Names an event record offers for its chat.
pub trait ConversationNames {
    fn optional_display_name(&self) -> Option<&str> {
        None
    }

    fn optional_name(&self) -> Option<&str> {
        None
    }
}

impl ConversationNames for HistoryConversation {
    fn optional_display_name(&self) -> Option<&str> {
        self.display_name.as_deref().filter(|n| !n.is_empty())
    }

    fn optional_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// A live message only names its chat in a direct conversation, through the
/// sender's push name.
impl ConversationNames for IncomingMessage {
    fn optional_name(&self) -> Option<&str> {
        if self.chat.is_group() {
            return None;
        }
        self.push_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Result of uploading an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_length: u64,
}

/// What the client needs to fetch a stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_length: u64,
}

/// Voice note extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNote {
    pub seconds: u32,
    pub waveform: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub kind: MediaKind,
    pub mime_type: String,
    pub file_name: String,
    pub upload: UploadedMedia,
    pub voice: Option<VoiceNote>,
}

/// Text, or an attachment with the text as caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub attachment: Option<OutgoingAttachment>,
}

/// Address book entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub jid: Jid,
    pub name: String,
}

/// A group the account belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    pub jid: Jid,
    pub name: String,
    pub participants: Vec<Jid>,
}

/// Connection to the messaging service for one account.
///
/// Implementations are internally synchronized; the session calls them from
/// several tasks at once.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Bring up the transport.
    async fn connect(&self) -> Result<(), BridgeError>;

    async fn disconnect(&self);

    /// Transport-level connectivity, independent of pairing.
    fn is_connected(&self) -> bool;

    fn has_stored_credential(&self) -> bool;

    /// Own address once paired.
    fn identity(&self) -> Option<Jid>;

    /// Open the pairing-code stream. Must be called before `connect` on an
    /// unpaired account. The stream closes after success or when codes run out.
    async fn pairing_events(&self) -> Result<UnboundedReceiver<PairingEvent>, BridgeError>;

    /// Unlink the account on the service side and drop local credentials.
    async fn logout(&self) -> Result<(), BridgeError>;

    /// Turn off disappearing messages for new chats.
    async fn disable_ephemeral_timer(&self) -> Result<(), BridgeError>;

    /// Returns the message id assigned by the service.
    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<String, BridgeError>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, BridgeError>;

    async fn download(&self, media: &MediaReference) -> Result<Vec<u8>, BridgeError>;

    /// Address book name of a contact.
    async fn contact_name(&self, jid: &Jid) -> Option<String>;

    /// Subject of a group, fetched from the service.
    async fn group_name(&self, jid: &Jid) -> Result<Option<String>, BridgeError>;

    /// Locally stored address book. Works without a transport.
    async fn contacts(&self) -> Result<Vec<Contact>, BridgeError>;

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>, BridgeError>;

    /// `NotFound` when the account is not in the group.
    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo, BridgeError>;

    async fn leave_group(&self, jid: &Jid) -> Result<(), BridgeError>;
}

/// Builds the client for a session when the session is first opened.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        session_id: &str,
        credentials: CredentialStore,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<Arc<dyn MessagingClient>, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(chat: &str, push_name: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            id: "ABC".to_string(),
            chat: chat.parse().unwrap(),
            sender: "15550001111".to_string(),
            push_name: push_name.map(str::to_string),
            is_from_me: false,
            timestamp: Utc::now(),
            text: Some("hi".to_string()),
            media: None,
        }
    }

    #[test]
    fn test_incoming_message_names_direct_chats_only() {
        let direct = incoming("15550001111@s.whatsapp.net", Some("Alex"));
        assert_eq!(direct.optional_name(), Some("Alex"));
        assert_eq!(direct.optional_display_name(), None);

        let group = incoming("120363000000000000@g.us", Some("Alex"));
        assert_eq!(group.optional_name(), None);
    }

    #[test]
    fn test_history_conversation_ignores_empty_names() {
        let conversation = HistoryConversation {
            id: "120363000000000000@g.us".to_string(),
            display_name: Some(String::new()),
            name: Some("Climbing".to_string()),
            messages: Vec::new(),
        };
        assert_eq!(conversation.optional_display_name(), None);
        assert_eq!(conversation.optional_name(), Some("Climbing"));
    }
}
