//! SSH server bootstrap: host-key lifecycle and the
//! [`russh::server::Server`] implementation.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::MethodSet;
use russh::server::{self, Server};
use russh_keys::PublicKeyBase64;
use russh_keys::key::KeyPair;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::session::SshSession;
use crate::AppState;
use crate::keys::fingerprint_blob;

pub struct SshServer {
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl server::Server for SshServer {
    type Handler = SshSession;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        SshSession::new(Arc::clone(&self.state), peer_addr, self.shutdown.clone())
    }
}

/// Load the persistent Ed25519 host key, generating it on first boot. An
/// existing but unparsable key file is an error, never a silent regenerate.
pub fn ensure_host_key(key_path: &Path) -> Result<KeyPair> {
    match fs::read_to_string(key_path) {
        Ok(pem) => {
            let key = russh_keys::decode_secret_key(&pem, None)
                .with_context(|| format!("parse host key {}", key_path.display()))?;
            info!(path = %key_path.display(), "loaded SSH host key");
            Ok(key)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %key_path.display(), "generating SSH host key");
            if let Some(parent) = key_path.parent() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
                }
            }

            let key = KeyPair::generate_ed25519();
            let mut pem = Vec::new();
            russh_keys::encode_pkcs8_pem(&key, &mut pem).context("encode host key")?;
            fs::write(key_path, &pem)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
            }

            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("read host key {}", key_path.display())),
    }
}

/// Run the SSH listener until shutdown is requested.
pub async fn start_ssh_server(state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let key_path = state.config.ssh_host_key_path();
    let host_key = ensure_host_key(&key_path)?;
    info!(
        fingerprint = %fingerprint_blob(&host_key.public_key_bytes()),
        "SSH host key fingerprint"
    );

    let config = Arc::new(server::Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        inactivity_timeout: Some(Duration::from_secs(600)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        ..Default::default()
    });

    let listen_addr = state.config.ssh.listen_addr.clone();
    info!(address = %listen_addr, "SSH server listening");

    let mut ssh_server = SshServer {
        state,
        shutdown: shutdown.clone(),
    };

    tokio::select! {
        result = ssh_server.run_on_address(config, listen_addr.as_str()) => {
            result.context("SSH server exited with error")?;
        }
        () = shutdown.cancelled() => {
            info!("SSH listener shutting down");
        }
    }

    Ok(())
}
