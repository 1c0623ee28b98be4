//! # Per-Session Persistence
//!
//! Each session directory holds two stores:
//! - **Credentials** (`device.json`): whether and as whom the session is paired
//! - **Messages** (`messages.db`): chat list and message history

pub mod credentials;
pub mod messages;

pub use credentials::CredentialStore;
pub use messages::{MessageStore, StoredMedia, StoredMessage};
