//! Static viewer assets
//!
//! Only a fixed set of file names is served; the request path is never joined
//! onto the web root, so nothing outside the set is reachable.

use std::path::Path;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Served file names and their content types
pub const ASSETS: &[(&str, &str)] = &[
    ("index.html", "text/html; charset=utf-8"),
    ("webrtc.html", "text/html; charset=utf-8"),
    ("webrtc.js", "application/javascript"),
    ("main.js", "application/javascript"),
    ("hls.js", "application/javascript"),
    ("bootstrap.min.css", "text/css"),
    ("bootstrap.bundle.min.js", "application/javascript"),
    ("jquery.min.js", "application/javascript"),
];

/// Page `/` redirects to
pub const LANDING_PAGE: &str = "/webrtc.html";

pub fn content_type(name: &str) -> Option<&'static str> {
    ASSETS
        .iter()
        .find(|(asset, _)| *asset == name)
        .map(|(_, mime)| *mime)
}

/// Read one asset from `root`
pub async fn serve_asset(root: &Path, name: &str) -> Response {
    let Some(mime) = content_type(name) else {
        tracing::debug!(asset = name, "Unknown asset requested");
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(root.join(name)).await {
        Ok(body) => ([(header::CONTENT_TYPE, mime)], body).into_response(),
        Err(e) => {
            tracing::warn!(asset = name, error = %e, "Asset unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
