//! # Sessions
//!
//! A session is one linked messaging account: its client, its on-disk stores and its
//! pairing state machine. The `SessionRegistry` owns every session in the process.
//!
//! - `session`: connect/pairing state machine and status
//! - `events`: consumer for the client's event stream (messages, history, logout)
//! - `outbound`: sending and attachment download
//! - `registry`: creation, lookup and restore-on-start

pub mod events;
pub mod outbound;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::SessionRegistry;
pub use session::{ConnectOutcome, PairingState, Session};
