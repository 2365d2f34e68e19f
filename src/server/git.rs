//! Smart-git HTTP handlers: ref advertisement and upload-pack exchange.
//! This surface is strictly read-only; pushes belong to SSH.

use std::sync::Arc;

use async_compression::tokio::bufread::GzipDecoder;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::AppState;
use crate::git::{self, GitService, ServiceRequest, advertisement_header};

const PUSH_DENIED: &str = "push over HTTP is not supported — use SSH";
const STREAM_BUF: usize = 64 * 1024;

#[derive(Deserialize)]
pub struct InfoRefsQuery {
    service: Option<String>,
}

/// Canonical short status body, identical for every repo we decline to talk
/// about — a private repository must be indistinguishable from a missing
/// one.
fn status_response(code: StatusCode) -> Response {
    let body = format!("{} {}\n", code.as_u16(), code.canonical_reason().unwrap_or(""));
    (code, body).into_response()
}

/// Clean a repository name from the URL path: drop a `.git` suffix, trim
/// slashes, and refuse anything with path separators or dot-dot segments.
pub fn sanitize_repo_name(raw: &str) -> Option<String> {
    let name = raw.strip_suffix(".git").unwrap_or(raw);
    let name = name.trim_matches('/');

    if name.is_empty() || name.contains('/') || name.contains("..") {
        return None;
    }

    Some(name.to_string())
}

/// A repository is served iff it has a row and is not private.
fn can_read_repo(state: &AppState, name: &str) -> bool {
    match state.store.get_repo(name) {
        Ok(Some(repo)) => !repo.is_private,
        Ok(None) => false,
        Err(e) => {
            warn!("repo lookup failed: {e}");
            false
        }
    }
}

pub async fn info_refs(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
) -> Response {
    match query.service.as_deref() {
        Some("git-upload-pack") => {}
        Some("git-receive-pack") => {
            return (StatusCode::FORBIDDEN, PUSH_DENIED).into_response();
        }
        _ => return status_response(StatusCode::BAD_REQUEST),
    }

    let Some(name) = sanitize_repo_name(&repo) else {
        return status_response(StatusCode::NOT_FOUND);
    };
    if !can_read_repo(&state, &name) {
        return status_response(StatusCode::NOT_FOUND);
    }

    let request = ServiceRequest::new(state.config.repo_path(&name))
        .args(&["--stateless-rpc", "--advertise-refs"]);

    stream_service_response(
        state,
        name,
        GitService::UploadPack,
        request,
        Vec::new(),
        GitService::UploadPack.advertisement_content_type(),
        Some(advertisement_header(GitService::UploadPack)),
    )
}

pub async fn upload_pack(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(name) = sanitize_repo_name(&repo) else {
        return status_response(StatusCode::NOT_FOUND);
    };
    if !can_read_repo(&state, &name) {
        return status_response(StatusCode::NOT_FOUND);
    }

    let input = match decompress_if_gzip(&headers, body).await {
        Ok(data) => data,
        Err(response) => return response,
    };

    let request =
        ServiceRequest::new(state.config.repo_path(&name)).args(&["--stateless-rpc"]);

    stream_service_response(
        state,
        name,
        GitService::UploadPack,
        request,
        input,
        GitService::UploadPack.result_content_type(),
        None,
    )
}

pub async fn receive_pack_denied() -> Response {
    (StatusCode::FORBIDDEN, PUSH_DENIED).into_response()
}

/// Start the child and hand its stdout to the client as a chunked stream.
/// A mid-stream child failure is logged and truncates the response; the
/// smart-git protocol is self-synchronizing on the client side.
fn stream_service_response(
    state: Arc<AppState>,
    repo_name: String,
    service: GitService,
    request: ServiceRequest,
    input: Vec<u8>,
    content_type: &'static str,
    preamble: Option<Vec<u8>>,
) -> Response {
    let (mut writer, reader) = tokio::io::duplex(STREAM_BUF);

    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;

        if let Some(preamble) = preamble {
            if writer.write_all(&preamble).await.is_err() {
                return;
            }
        }

        let cancel = state.shutdown.clone();
        if let Err(e) = git::run_service(
            service,
            request,
            std::io::Cursor::new(input),
            writer,
            tokio::io::sink(),
            &cancel,
        )
        .await
        {
            warn!(repo = %repo_name, "git {} failed: {e}", service.command_name());
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Cache-Control", "no-cache")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

async fn decompress_if_gzip(headers: &HeaderMap, body: Bytes) -> Result<Vec<u8>, Response> {
    let content_encoding = headers
        .get("Content-Encoding")
        .and_then(|v| v.to_str().ok());

    if content_encoding == Some("gzip") {
        let reader = std::io::Cursor::new(body);
        let mut decoder = GzipDecoder::new(tokio::io::BufReader::new(reader));
        let mut decompressed = Vec::new();

        decoder
            .read_to_end(&mut decompressed)
            .await
            .map_err(|_| status_response(StatusCode::BAD_REQUEST))?;

        Ok(decompressed)
    } else {
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_suffix_and_slashes() {
        assert_eq!(sanitize_repo_name("proj.git").as_deref(), Some("proj"));
        assert_eq!(sanitize_repo_name("/proj/").as_deref(), Some("proj"));
        assert_eq!(sanitize_repo_name("proj").as_deref(), Some("proj"));
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert_eq!(sanitize_repo_name(".."), None);
        assert_eq!(sanitize_repo_name("../etc"), None);
        assert_eq!(sanitize_repo_name("a/../b"), None);
        assert_eq!(sanitize_repo_name("a/b"), None);
        assert_eq!(sanitize_repo_name(""), None);
        assert_eq!(sanitize_repo_name(".git"), None);
    }

    #[test]
    fn sanitize_keeps_inner_dots() {
        assert_eq!(sanitize_repo_name("my.repo").as_deref(), Some("my.repo"));
        assert_eq!(
            sanitize_repo_name("release-1.2.git").as_deref(),
            Some("release-1.2")
        );
    }
}
