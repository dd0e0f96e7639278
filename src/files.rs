//! Upload handling and the file-browser routes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use tracing::{info, warn};

use crate::server::AppCtx;
use crate::{AppError, Result};

/// Decode and store an uploaded attachment, returning its absolute path.
///
/// The client-side name is reduced to its final component; on collision
/// the stored name is uniquified with a short random prefix.
///
/// # Errors
///
/// Returns `AppError::Decode` for invalid base64 and `AppError::Io` for
/// write failures.
pub async fn save_attachment(upload_dir: &Path, name: &str, data: &str) -> Result<PathBuf> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|err| AppError::Decode(format!("invalid attachment base64: {err}")))?;

    let safe_name = sanitize_name(name);
    tokio::fs::create_dir_all(upload_dir).await?;

    let mut path = upload_dir.join(&safe_name);
    if path.exists() {
        let prefix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
        path = upload_dir.join(format!("{prefix}-{safe_name}"));
    }
    tokio::fs::write(&path, &bytes).await?;
    info!(path = %path.display(), size = bytes.len(), "stored attachment");
    Ok(path)
}

/// Reduce a client-supplied file name to a safe final component.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .replace("..", "_");
    if base.is_empty() {
        "upload".to_owned()
    } else {
        base
    }
}

/// `GET /files` — HTML listing of the upload directory.
pub async fn browse(State(ctx): State<Arc<AppCtx>>) -> Html<String> {
    let mut entries: Vec<(String, u64)> = Vec::new();
    if let Ok(mut dir) = tokio::fs::read_dir(&ctx.config.upload_dir).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_file() {
                entries.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
            }
        }
    }
    entries.sort();

    let mut html = String::from(
        "<!DOCTYPE html><html><head><title>Files</title></head><body><h1>Files</h1><ul>",
    );
    for (name, size) in entries {
        let escaped = escape_html(&name);
        html.push_str(&format!(
            "<li><a href=\"/files/{escaped}\">{escaped}</a> ({size} bytes)</li>"
        ));
    }
    html.push_str("</ul></body></html>");
    Html(html)
}

/// `GET /files/{name}` — serve one file from the upload directory.
pub async fn serve(State(ctx): State<Arc<AppCtx>>, UrlPath(name): UrlPath<String>) -> Response {
    let safe_name = sanitize_name(&name);
    if safe_name != name {
        return (StatusCode::BAD_REQUEST, "invalid file name").into_response();
    }
    let path = ctx.config.upload_dir.join(&safe_name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response()
        }
        Err(err) => {
            warn!(name = %safe_name, %err, "file not served");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
