//! Address book and group membership.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::client::jid::Jid;
use crate::error::{AppError, AppResult};
use crate::handlers::{resolve_session_id, session_for, SessionQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    pub jid: Option<String>,
}

impl GroupQuery {
    fn group(&self) -> AppResult<Jid> {
        let raw = self
            .jid
            .as_deref()
            .filter(|jid| !jid.is_empty())
            .ok_or_else(|| AppError::BadRequest("jid is required".to_string()))?;

        let jid: Jid = raw.parse()?;
        if !jid.is_group() {
            return Err(AppError::BadRequest(format!("{} is not a group", jid)));
        }
        Ok(jid)
    }
}

pub async fn list_contacts(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    let contacts = session.client().contacts().await?;
    Ok(HttpResponse::Ok().json(contacts))
}

pub async fn list_groups(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> AppResult<HttpResponse> {
    let session = session_for(&state, query.id())?;
    let groups = session.client().joined_groups().await?;
    Ok(HttpResponse::Ok().json(groups))
}

pub async fn get_group_info(
    state: web::Data<AppState>,
    query: web::Query<GroupQuery>,
) -> AppResult<HttpResponse> {
    let group = query.group()?;
    let session = session_for(&state, resolve_session_id(query.session_id.as_deref()))?;
    let info = session.client().group_info(&group).await?;
    Ok(HttpResponse::Ok().json(info))
}

pub async fn leave_group(
    state: web::Data<AppState>,
    query: web::Query<GroupQuery>,
) -> AppResult<HttpResponse> {
    let group = query.group()?;
    let session = session_for(&state, resolve_session_id(query.session_id.as_deref()))?;
    session.client().leave_group(&group).await?;

    info!(session_id = %session.id(), group = %group, "Left group via API");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Left group successfully"
    })))
}
