use crate::state::AppState;
use crate::webhook::endpoint_host;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. The webhook URL is reduced to its host.
pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;

    let webhook_host = config.webhook_url().and_then(endpoint_host);

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "store": {
                "dir": config.store.dir
            },
            "pairing": {
                "qr_wait_ms": config.pairing.qr_wait_ms
            },
            "webhook": {
                "enabled": webhook_host.is_some(),
                "host": webhook_host,
                "timeout_secs": config.webhook.timeout_secs
            },
            "client": {
                "backend": config.client.backend,
                "code_interval_secs": config.client.code_interval_secs,
                "max_codes": config.client.max_codes,
                "connect_delay_ms": config.client.connect_delay_ms
            }
        }
    }))
}
