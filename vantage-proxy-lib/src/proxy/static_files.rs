//! Static file serving for routes with a `static_dir` (spec §4.H: "attempt
//! file (exact then `index.html`); on miss fall back to upstream"). New
//! module — the teacher proxies exclusively to backends and never serves
//! files itself.

use super::synthetic_response::{bytes_body, RespBody};
use bytes::Bytes;
use http::{Response, StatusCode};
use std::path::{Component, Path, PathBuf};

/// Resolves `request_path` (with `path_prefix` stripped) against `root`,
/// rejecting any `..` traversal component outright, and tries the exact
/// file first, then `index.html` if the resolved path is a directory.
/// Returns `None` on any miss so the caller falls back to the upstream.
pub async fn try_serve(root: &Path, path_prefix: &str, request_path: &str) -> Option<Response<RespBody>> {
    let relative = request_path.strip_prefix(path_prefix).unwrap_or(request_path).trim_start_matches('/');

    let rel_path = Path::new(relative);
    if rel_path.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }

    let candidate = root.join(rel_path);
    let resolved = if candidate.is_dir() { candidate.join("index.html") } else { candidate };

    let bytes = tokio::fs::read(&resolved).await.ok()?;
    let content_type = guess_content_type(&resolved);
    Some(build_response(bytes.into(), content_type))
}

fn build_response(bytes: Bytes, content_type: &str) -> Response<RespBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(bytes_body(bytes))
        .unwrap_or_else(|_| Response::new(bytes_body(Bytes::new())))
}

fn guess_content_type(path: &PathBuf) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn serves_exact_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();
        let resp = try_serve(dir.path(), "/static", "/static/hello.txt").await;
        assert!(resp.is_some());
    }

    #[tokio::test]
    async fn falls_back_to_index_html_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("app");
        std::fs::create_dir(&sub).unwrap();
        let mut f = std::fs::File::create(sub.join("index.html")).unwrap();
        f.write_all(b"<html></html>").unwrap();
        let resp = try_serve(dir.path(), "/static", "/static/app").await;
        assert!(resp.is_some());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let resp = try_serve(dir.path(), "/static", "/static/../../etc/passwd").await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn returns_none_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let resp = try_serve(dir.path(), "/static", "/static/missing.txt").await;
        assert!(resp.is_none());
    }
}
