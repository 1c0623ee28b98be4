//! # HTTP Handlers
//!
//! Every session-scoped route takes `?sessionId=`; a missing id means `"default"`.
//! The session is created on first reference.

pub mod audio;
pub mod config;
pub mod groups;
pub mod messages;
pub mod sessions;

use actix_web::web;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::AppResult;
use crate::session::Session;
use crate::state::AppState;

pub use self::audio::*;
pub use self::config::*;
pub use self::groups::*;
pub use self::messages::*;
pub use self::sessions::*;

pub const DEFAULT_SESSION_ID: &str = "default";

/// `?sessionId=` on its own.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl SessionQuery {
    pub fn id(&self) -> &str {
        resolve_session_id(self.session_id.as_deref())
    }
}

pub(crate) fn resolve_session_id(id: Option<&str>) -> &str {
    match id {
        Some(id) if !id.is_empty() => id,
        _ => DEFAULT_SESSION_ID,
    }
}

pub(crate) fn session_for(state: &AppState, id: &str) -> AppResult<Arc<Session>> {
    Ok(state.registry.get_or_create(id)?)
}

/// All `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/sessions", web::get().to(list_sessions))
            .route("/status", web::get().to(get_status))
            .route("/qr", web::get().to(get_qr))
            .route("/connect", web::post().to(connect_session))
            .route("/logout", web::post().to(logout_session))
            .route("/chats", web::get().to(list_chats))
            .route("/messages", web::get().to(list_messages))
            .route("/send", web::post().to(send_message))
            .route("/download", web::post().to(download_media))
            .route("/contacts", web::get().to(list_contacts))
            .route("/groups", web::get().to(list_groups))
            .route("/group/info", web::get().to(get_group_info))
            .route("/group/leave", web::post().to(leave_group))
            .route("/audio/analyze", web::post().to(analyze_audio))
            .route("/audio/waveform", web::get().to(synthesize_waveform))
            .route("/config", web::get().to(get_config))
            .route("/metrics", web::get().to(crate::health::detailed_metrics)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_empty_session_id_is_default() {
        assert_eq!(SessionQuery::default().id(), "default");
        let empty = SessionQuery {
            session_id: Some(String::new()),
        };
        assert_eq!(empty.id(), "default");
        let named = SessionQuery {
            session_id: Some("sales".to_string()),
        };
        assert_eq!(named.id(), "sales");
    }
}
