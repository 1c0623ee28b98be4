//! Chat history, sending and attachment download.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::handlers::{resolve_session_id, session_for, SessionQuery};
use crate::state::AppState;

const DEFAULT_MESSAGE_LIMIT: usize = 20;
const MAX_MESSAGE_LIMIT: usize = 1000;

fn message_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_MESSAGE_LIMIT).min(MAX_MESSAGE_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub chat_jid: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub media_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadMediaRequest {
    pub message_id: String,
    pub chat_jid: String,
}

pub async fn list_chats(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    let chats = session.messages().chats()?;
    Ok(HttpResponse::Ok().json(chats))
}

/// Newest first, `limit` defaults to 20 and is capped at 1000.
pub async fn list_messages(
    state: web::Data<AppState>,
    query: web::Query<MessagesQuery>,
) -> AppResult<HttpResponse> {
    let chat_jid = query
        .chat_jid
        .as_deref()
        .filter(|jid| !jid.is_empty())
        .ok_or_else(|| AppError::BadRequest("chat_jid is required".to_string()))?;

    let session = session_for(&state, resolve_session_id(query.session_id.as_deref()))?;
    let messages = session
        .messages()
        .messages(chat_jid, message_limit(query.limit))?;
    Ok(HttpResponse::Ok().json(messages))
}

pub async fn send_message(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
    body: web::Json<SendMessageRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();
    let media_path = request.media_path.as_deref().filter(|p| !p.is_empty());

    if request.recipient.trim().is_empty() {
        return Err(AppError::BadRequest("recipient is required".to_string()));
    }
    if request.message.is_empty() && media_path.is_none() {
        return Err(AppError::BadRequest(
            "message or media_path is required".to_string(),
        ));
    }

    let session = session_for(&state, query.id())?;
    let receipt = session
        .send(&request.recipient, &request.message, media_path.map(Path::new))
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("Message sent to {}", receipt.recipient),
        "message_id": receipt.message_id,
        "recipient": receipt.recipient
    })))
}

pub async fn download_media(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
    body: web::Json<DownloadMediaRequest>,
) -> AppResult<HttpResponse> {
    if body.message_id.is_empty() || body.chat_jid.is_empty() {
        return Err(AppError::BadRequest(
            "message_id and chat_jid are required".to_string(),
        ));
    }

    let session = session_for(&state, query.id())?;
    let media = session.download_media(&body.message_id, &body.chat_jid).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("Downloaded {} media", media.media_type.as_str()),
        "filename": media.filename,
        "path": media.path.display().to_string()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};
    use tempfile::TempDir;

    #[actix_web::test]
    async fn test_sent_text_shows_up_in_history() {
        let dir = TempDir::new().unwrap();
        let (state, factory) = test_state(dir.path());
        state.registry.get_or_create("default").unwrap();
        factory.client("default").unwrap().set_socket_connected(true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/send")
            .set_json(json!({ "recipient": "15551112222", "message": "on my way" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["recipient"], "15551112222@s.whatsapp.net");

        let req = test::TestRequest::get()
            .uri("/api/messages?chat_jid=15551112222@s.whatsapp.net")
            .to_request();
        let messages: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(messages[0]["content"], "on my way");
        assert_eq!(messages[0]["is_from_me"], true);
        assert_eq!(messages[0]["sender"], "me");

        let req = test::TestRequest::get().uri("/api/chats").to_request();
        let chats: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chats[0]["jid"], "15551112222@s.whatsapp.net");
    }

    #[::core::prelude::v1::test]
    fn test_message_limit_is_capped() {
        assert_eq!(message_limit(None), DEFAULT_MESSAGE_LIMIT);
        assert_eq!(message_limit(Some(5)), 5);
        assert_eq!(message_limit(Some(usize::MAX)), MAX_MESSAGE_LIMIT);
    }

    #[actix_web::test]
    async fn test_huge_limit_is_accepted() {
        let dir = TempDir::new().unwrap();
        let (state, factory) = test_state(dir.path());
        state.registry.get_or_create("default").unwrap();
        factory.client("default").unwrap().set_socket_connected(true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        for text in ["one", "two"] {
            let req = test::TestRequest::post()
                .uri("/api/send")
                .set_json(json!({ "recipient": "15551113333", "message": text }))
                .to_request();
            assert!(test::call_service(&app, req).await.status().is_success());
        }

        let req = test::TestRequest::get()
            .uri("/api/messages?chat_jid=15551113333@s.whatsapp.net&limit=18446744073709551615")
            .to_request();
        let messages: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(messages.as_array().map(Vec::len), Some(2));
    }

    #[actix_web::test]
    async fn test_send_while_disconnected_is_conflict() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(dir.path());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/send?sessionId=idle")
            .set_json(json!({ "recipient": "15551112222", "message": "hello" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_connected");
    }

    #[actix_web::test]
    async fn test_request_validation() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(dir.path());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/messages").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::post()
            .uri("/api/send")
            .set_json(json!({ "recipient": "15551112222" }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::post()
            .uri("/api/download")
            .set_json(json!({ "message_id": "", "chat_jid": "x@s.whatsapp.net" }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[actix_web::test]
    async fn test_download_unknown_message_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(dir.path());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/download")
            .set_json(json!({ "message_id": "ABC", "chat_jid": "15551112222@s.whatsapp.net" }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
