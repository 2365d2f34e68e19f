//! SSH front-end for git operations.
//!
//! Accepts connections from git clients, authenticates them by public-key
//! fingerprint against the store, and dispatches `git-upload-pack` /
//! `git-receive-pack` through the service invoker with the per-push
//! environment the hooks rely on. Only exec channels are served; interactive
//! sessions are rejected.

pub mod server;
pub mod session;

pub use server::start_ssh_server;
