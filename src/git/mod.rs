//! Subprocess-backed git service invocation.
//!
//! The invoker spawns `git upload-pack` / `git receive-pack` against a bare
//! repository, wires caller-supplied streams to the child's stdio, and never
//! interprets the protocol bytes itself.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Upper bound on the stderr tail retained for error reports.
const STDERR_TAIL_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "git-upload-pack" => Some(Self::UploadPack),
            "git-receive-pack" => Some(Self::ReceivePack),
            _ => None,
        }
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// The git subcommand, without the "git-" prefix.
    pub fn subcommand(&self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }
}

/// Everything needed to run a service against one bare repository, minus the
/// stdio streams the caller wires up per transport.
pub struct ServiceRequest {
    pub repo_dir: PathBuf,
    pub args: Vec<&'static str>,
    /// Extra `NAME=VALUE` bindings layered over the inherited environment.
    /// For pushes this carries the `ORIGIN_*` context the hooks recover.
    pub env: Vec<(String, String)>,
}

impl ServiceRequest {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self {
            repo_dir,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn args(mut self, args: &[&'static str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    #[must_use]
    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Run a git service to completion, streaming between the caller's stdio
/// triple and the child. The child is killed when `cancel` fires or when the
/// downstream writer goes away; a bounded stderr tail is kept for the error
/// report while stderr is still relayed to the caller.
pub async fn run_service<R, W, E>(
    service: GitService,
    request: ServiceRequest,
    stdin: R,
    stdout: W,
    stderr: E,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut command = Command::new("git");
    command
        .arg(service.subcommand())
        .args(&request.args)
        .arg(&request.repo_dir)
        .current_dir(&request.repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (name, value) in &request.env {
        command.env(name, value);
    }

    let mut child = command.spawn()?;
    let mut child_in = child
        .stdin
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stdin unavailable")))?;
    let mut child_out = child
        .stdout
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stdout unavailable")))?;
    let mut child_err = child
        .stderr
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stderr unavailable")))?;

    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut tail = Vec::new();

    // Feed the caller's stdin from a detached task: a client that never
    // sends EOF must not keep the invocation alive once the child exits and
    // its output streams have drained.
    let feed = tokio::spawn(async move {
        let mut stdin = stdin;
        let _ = tokio::io::copy(&mut stdin, &mut child_in).await;
        let _ = child_in.shutdown().await;
    });

    let io_result: std::io::Result<()> = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            child.kill().await.ok();
            feed.abort();
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "git service cancelled",
            )));
        }
        res = async {
            tokio::try_join!(
                async {
                    tokio::io::copy(&mut child_out, &mut stdout).await?;
                    stdout.flush().await?;
                    Ok(())
                },
                async {
                    let mut buf = [0u8; 8192];
                    loop {
                        let n = child_err.read(&mut buf).await?;
                        if n == 0 {
                            break;
                        }
                        stderr.write_all(&buf[..n]).await.ok();
                        stderr.flush().await.ok();
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_LIMIT {
                            let excess = tail.len() - STDERR_TAIL_LIMIT;
                            tail.drain(..excess);
                        }
                    }
                    Ok::<(), std::io::Error>(())
                },
            )
            .map(|_| ())
        } => res,
    };

    if io_result.is_err() {
        // Downstream went away mid-stream; stop feeding the pipe.
        child.kill().await.ok();
    }

    let status = child.wait().await?;
    feed.abort();
    if !status.success() {
        return Err(Error::GitService {
            service: service.command_name(),
            code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&tail).trim().to_string(),
        });
    }

    io_result.map_err(Error::Io)
}

/// Format a pkt-line: 4 hex digits covering the whole segment, then the
/// payload with a trailing newline.
#[must_use]
pub fn pkt_line(payload: &str) -> Vec<u8> {
    format!("{:04x}{payload}\n", payload.len() + 5).into_bytes()
}

/// The smart-HTTP advertisement preamble: the service pkt-line followed by a
/// flush packet.
#[must_use]
pub fn advertisement_header(service: GitService) -> Vec<u8> {
    let mut header = pkt_line(&format!("# service={}", service.command_name()));
    header.extend_from_slice(b"0000");
    header
}
