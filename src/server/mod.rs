//! HTTP front-end: the read-only smart-git surface.

mod git;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get, routing::post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::AppState;

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::debug!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{repo}/info/refs", get(git::info_refs))
        .route("/{repo}/git-upload-pack", post(git::upload_pack))
        .route("/{repo}/git-receive-pack", post(git::receive_pack_denied))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve HTTP (or HTTPS when both TLS paths are configured) until shutdown.
pub async fn start_http_server(state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = state
        .config
        .http
        .listen_addr
        .parse()
        .with_context(|| format!("invalid http listen_addr: {}", state.config.http.listen_addr))?;

    let app = create_router(Arc::clone(&state));

    if state.config.has_tls() {
        let cert = state
            .config
            .http
            .tls_cert_path
            .as_ref()
            .context("tls_cert_path missing")?;
        let key = state
            .config
            .http
            .tls_key_path
            .as_ref()
            .context("tls_key_path missing")?;
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .context("load TLS certificate")?;

        info!(address = %addr, "HTTPS server listening");

        let handle = axum_server::Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                handle.shutdown();
            }
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTPS server error")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind HTTP listener on {addr}"))?;

        info!(address = %addr, "HTTP server listening (no TLS)");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await
            .context("HTTP server error")?;
    }

    Ok(())
}
