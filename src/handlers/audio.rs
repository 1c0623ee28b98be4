//! Stand-alone access to the voice-note analyzer and waveform synthesizer.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::audio::{self, WAVEFORM_LEN};
use crate::error::AppResult;

/// Upper bound for a raw audio upload.
pub const MAX_AUDIO_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct WaveformQuery {
    pub duration: u32,
}

/// Body is the raw Ogg/Opus file.
pub async fn analyze_audio(body: web::Bytes) -> AppResult<HttpResponse> {
    let analysis = audio::analyze(&body)?;

    Ok(HttpResponse::Ok().json(json!({
        "bytes": body.len(),
        "duration_seconds": analysis.duration_seconds,
        "waveform": analysis.waveform.to_vec()
    })))
}

pub async fn synthesize_waveform(query: web::Query<WaveformQuery>) -> HttpResponse {
    let waveform = audio::synthesize(query.duration);

    HttpResponse::Ok().json(json!({
        "duration_seconds": query.duration,
        "length": WAVEFORM_LEN,
        "waveform": waveform.to_vec()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_analyze_estimates_from_size() {
        let app = test::init_service(
            App::new()
                .app_data(web::PayloadConfig::new(MAX_AUDIO_BYTES))
                .route("/api/audio/analyze", web::post().to(analyze_audio))
                .route("/api/audio/waveform", web::get().to(synthesize_waveform)),
        )
        .await;

        let mut data = b"OggS".to_vec();
        data.resize(10_000, 0);
        let req = test::TestRequest::post()
            .uri("/api/audio/analyze")
            .set_payload(data)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["duration_seconds"], 5);
        assert_eq!(body["waveform"].as_array().map(Vec::len), Some(WAVEFORM_LEN));
    }

    #[actix_web::test]
    async fn test_analyze_rejects_non_ogg() {
        let app = test::init_service(
            App::new()
                .app_data(web::PayloadConfig::new(MAX_AUDIO_BYTES))
                .route("/api/audio/analyze", web::post().to(analyze_audio))
                .route("/api/audio/waveform", web::get().to(synthesize_waveform)),
        )
        .await;

        for payload in [Vec::new(), b"RIFF....WAVE".to_vec()] {
            let req = test::TestRequest::post()
                .uri("/api/audio/analyze")
                .set_payload(payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[actix_web::test]
    async fn test_waveform_matches_synthesizer() {
        let app = test::init_service(
            App::new()
                .app_data(web::PayloadConfig::new(MAX_AUDIO_BYTES))
                .route("/api/audio/analyze", web::post().to(analyze_audio))
                .route("/api/audio/waveform", web::get().to(synthesize_waveform)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/audio/waveform?duration=30")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let expected: Vec<serde_json::Value> =
            audio::synthesize(30).iter().map(|v| json!(v)).collect();
        assert_eq!(body["waveform"], serde_json::Value::Array(expected));
    }
}
