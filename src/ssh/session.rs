//! Per-connection SSH session handler implementing the `russh`
//! [`Handler`] trait.
//!
//! Authentication is a plain store lookup: the presented key's fingerprint
//! must match exactly one registered row. Nothing is cached; removing a key
//! takes effect on the next connection. The exec command is parsed into a
//! git service + repository name and dispatched through the service invoker
//! with the push environment block.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::AppState;
use crate::git::{self, GitService, ServiceRequest};
use crate::hooks::{ENV_DATA_PATH, ENV_PUSHER_FINGERPRINT, ENV_REPO_NAME, ENV_REPO_PATH};
use crate::keys::fingerprint_public_key;

const CHANNEL_BUF: usize = 32 * 1024;

pub struct SshSession {
    state: Arc<AppState>,
    peer_addr: Option<SocketAddr>,
    fingerprint: Option<String>,
    /// Write ends feeding client channel data into running git children.
    stdins: HashMap<ChannelId, DuplexStream>,
    shutdown: CancellationToken,
}

impl SshSession {
    pub fn new(
        state: Arc<AppState>,
        peer_addr: Option<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            peer_addr,
            fingerprint: None,
            stdins: HashMap::new(),
            shutdown,
        }
    }

    /// Terminate the session with a single stderr line and exit code 1.
    fn reject(&self, session: &mut Session, channel: ChannelId, message: &str) {
        session.extended_data(
            channel,
            1,
            CryptoVec::from_slice(format!("{message}\n").as_bytes()),
        );
        session.exit_status_request(channel, 1);
        session.close(channel);
    }
}

/// Parse a git exec request: exactly `<service> <path>`, where the path may
/// be quoted, may carry a leading `/`, and may end in `.git`.
pub fn parse_git_command(command: &str) -> Option<(GitService, String)> {
    let mut fields = command.split_whitespace();
    let service = GitService::from_str(fields.next()?)?;
    let raw_path = fields.next()?;
    if fields.next().is_some() {
        return None;
    }

    let path = raw_path.trim_matches('\'').trim_matches('"');
    let path = path.trim_start_matches('/').trim_end_matches('/');
    let name = path.strip_suffix(".git").unwrap_or(path);

    if name.is_empty() {
        return None;
    }

    Some((service, name.to_string()))
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let fingerprint = fingerprint_public_key(key);

        match self.state.store.get_key_by_fingerprint(&fingerprint) {
            Ok(Some(_)) => {
                info!(
                    peer = ?self.peer_addr,
                    user = %user,
                    fingerprint = %fingerprint,
                    "SSH auth: accepted"
                );
                self.fingerprint = Some(fingerprint);
                Ok(Auth::Accept)
            }
            Ok(None) => {
                warn!(
                    peer = ?self.peer_addr,
                    fingerprint = %fingerprint,
                    "SSH auth: unknown key"
                );
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
            Err(e) => {
                warn!("SSH auth: store error: {e}");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.reject(session, channel, "interactive SSH sessions are not supported");
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).trim().to_string();
        if command.is_empty() {
            self.reject(session, channel, "interactive SSH sessions are not supported");
            return Ok(());
        }

        let Some((service, repo_name)) = parse_git_command(&command) else {
            self.reject(session, channel, &format!("invalid command: {command}"));
            return Ok(());
        };

        let repo = match self.state.store.get_repo(&repo_name) {
            Ok(Some(repo)) => repo,
            Ok(None) => {
                self.reject(
                    session,
                    channel,
                    &format!("repository not found: {repo_name}"),
                );
                return Ok(());
            }
            Err(e) => {
                warn!("SSH session: store error: {e}");
                self.reject(session, channel, "internal error");
                return Ok(());
            }
        };

        let fingerprint = self.fingerprint.clone().unwrap_or_default();
        let repo_path = self.state.config.repo_path(&repo.name);

        info!(
            service = service.command_name(),
            repo = %repo.name,
            fingerprint = %fingerprint,
            peer = ?self.peer_addr,
            "SSH git"
        );

        let request = ServiceRequest::new(repo_path.clone()).env(vec![
            (
                ENV_DATA_PATH.to_string(),
                self.state.config.data_path.display().to_string(),
            ),
            (ENV_REPO_NAME.to_string(), repo.name.clone()),
            (ENV_REPO_PATH.to_string(), repo_path.display().to_string()),
            (ENV_PUSHER_FINGERPRINT.to_string(), fingerprint),
        ]);

        let (stdin_tx, stdin_rx) = tokio::io::duplex(CHANNEL_BUF);
        self.stdins.insert(channel, stdin_tx);

        let handle = session.handle();
        let cancel = self.shutdown.clone();
        tokio::spawn(run_git_channel(handle, channel, service, request, stdin_rx, cancel));

        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // A closed pipe just means the child is done reading.
        let closed = match self.stdins.get_mut(&channel) {
            Some(stdin) => stdin.write_all(data).await.is_err(),
            None => false,
        };
        if closed {
            self.stdins.remove(&channel);
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the write end delivers EOF to the child's stdin.
        self.stdins.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.stdins.remove(&channel);
        Ok(())
    }
}

/// Drive one git service over an SSH channel: child stdout becomes channel
/// data, child stderr becomes extended data (so pushers see hook messages),
/// and the child's exit status becomes the session exit status.
async fn run_git_channel(
    handle: Handle,
    channel: ChannelId,
    service: GitService,
    request: ServiceRequest,
    stdin: DuplexStream,
    cancel: CancellationToken,
) {
    let (stdout_tx, stdout_rx) = tokio::io::duplex(CHANNEL_BUF);
    let (stderr_tx, stderr_rx) = tokio::io::duplex(CHANNEL_BUF);

    let out_pump = pump_to_channel(handle.clone(), channel, stdout_rx, None);
    let err_pump = pump_to_channel(handle.clone(), channel, stderr_rx, Some(1));
    let service_fut = git::run_service(service, request, stdin, stdout_tx, stderr_tx, &cancel);

    let (result, (), ()) = tokio::join!(service_fut, out_pump, err_pump);

    let exit_code = match result {
        Ok(()) => 0,
        Err(e) => {
            warn!(service = service.command_name(), "SSH git command failed: {e}");
            1
        }
    };

    let _ = handle.exit_status_request(channel, exit_code).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

async fn pump_to_channel(
    handle: Handle,
    channel: ChannelId,
    mut source: DuplexStream,
    extended: Option<u32>,
) {
    let mut buf = [0u8; CHANNEL_BUF];
    loop {
        match source.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let data = CryptoVec::from_slice(&buf[..n]);
                let sent = match extended {
                    Some(ext) => handle.extended_data(channel, ext, data).await,
                    None => handle.data(channel, data).await,
                };
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upload_pack_with_quotes_and_suffix() {
        let (service, repo) = parse_git_command("git-upload-pack 'proj.git'").unwrap();
        assert_eq!(service, GitService::UploadPack);
        assert_eq!(repo, "proj");
    }

    #[test]
    fn parse_receive_pack_with_leading_slash() {
        let (service, repo) = parse_git_command("git-receive-pack \"/proj\"").unwrap();
        assert_eq!(service, GitService::ReceivePack);
        assert_eq!(repo, "proj");
    }

    #[test]
    fn parse_requires_exactly_two_tokens() {
        assert!(parse_git_command("git-upload-pack").is_none());
        assert!(parse_git_command("git-upload-pack a b").is_none());
        assert!(parse_git_command("").is_none());
    }

    #[test]
    fn parse_rejects_unknown_services() {
        assert!(parse_git_command("scp -t /tmp").is_none());
        assert!(parse_git_command("git-shell proj").is_none());
    }

    #[test]
    fn parse_rejects_empty_path() {
        assert!(parse_git_command("git-upload-pack ''").is_none());
        assert!(parse_git_command("git-upload-pack /").is_none());
    }
}
