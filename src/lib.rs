//! # Origin
//!
//! A single-tenant, self-hosted git forge server. Authenticated pushes
//! arrive over SSH, read-only fetches are served over SSH and HTTP, every
//! pushed commit must carry a valid SSH signature from a registered key, and
//! successful pushes fan out HMAC-signed webhooks.
//!
//! The binary is dual-mode: invoked normally it runs the servers or the
//! admin CLI; invoked as `origin hook <name>` (by the scripts installed in
//! each bare repository) it runs the pre/post-receive logic against the
//! `ORIGIN_*` environment.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod hooks;
pub mod keys;
pub mod repos;
pub mod server;
pub mod ssh;
pub mod store;
pub mod types;
pub mod webhook;

/// State shared by both front-ends. Passed by explicit reference; there are
/// no hidden singletons.
pub struct AppState {
    pub config: Arc<config::Config>,
    pub store: Arc<dyn store::Store>,
    /// Root cancellation: fires on SIGINT/SIGTERM and stops both listeners
    /// along with any in-flight git children.
    pub shutdown: CancellationToken,
}
