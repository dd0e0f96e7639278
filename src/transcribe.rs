//! Speech-to-text glue: forwards audio to an external HTTP endpoint.
//!
//! The endpoint is a black box that accepts a multipart audio upload
//! and returns `{"text": ...}`. No retries; failures surface as HTTP
//! 502 with the upstream message.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use crate::server::AppCtx;
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Send audio bytes to the configured endpoint and return the transcript.
///
/// # Errors
///
/// Returns `AppError::Config` when the route is disabled and
/// `AppError::Transcribe` for endpoint failures.
pub async fn transcribe(ctx: &AppCtx, audio: Vec<u8>, mime_type: &str) -> Result<String> {
    let endpoint = &ctx.config.transcribe.endpoint;
    if endpoint.is_empty() {
        return Err(AppError::Config("transcription endpoint not configured".into()));
    }
    let api_key = std::env::var(&ctx.config.transcribe.api_key_var).unwrap_or_default();

    let part = reqwest::multipart::Part::bytes(audio)
        .file_name("audio")
        .mime_str(mime_type)
        .map_err(|err| AppError::Transcribe(format!("bad audio mime type: {err}")))?;
    let form = reqwest::multipart::Form::new()
        .text("model", ctx.config.transcribe.model.clone())
        .part("file", part);

    let mut request = ctx.http.post(endpoint).multipart(form);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .await
        .map_err(|err| AppError::Transcribe(format!("endpoint unreachable: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Transcribe(format!(
            "endpoint returned {status}: {body}"
        )));
    }

    let parsed: TranscriptionResponse = response
        .json()
        .await
        .map_err(|err| AppError::Transcribe(format!("unparsable endpoint response: {err}")))?;
    Ok(parsed.text)
}

/// `POST /transcribe` — raw audio in, `{"text": ...}` out.
pub async fn handle(State(ctx): State<Arc<AppCtx>>, headers: HeaderMap, body: Bytes) -> Response {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_owned();

    match transcribe(&ctx, body.to_vec(), &mime_type).await {
        Ok(text) => Json(serde_json::json!({ "text": text })).into_response(),
        Err(err) => {
            warn!(%err, "transcription failed");
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}
