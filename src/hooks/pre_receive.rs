//! Pre-receive signature enforcement.
//!
//! Every commit a push introduces must be signed by a key registered in the
//! store. The SSH layer already proved *some* registered key is pushing;
//! this hook independently checks that *each commit* carries a valid
//! signature from *some* registered key, so maintainers can push commits
//! signed by others.

use std::io::{BufRead, Write};
use std::path::Path;
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{HookContext, is_zero_sha, parse_ref_update};
use crate::error::{Error, Result};
use crate::store::{SqliteStore, Store};

pub fn verify(stdin: impl BufRead) -> Result<()> {
    let ctx = HookContext::from_env()?;

    info!(
        repo = %ctx.repo_name,
        pusher = %ctx.pusher_fingerprint,
        "pre-receive: verifying commit signatures"
    );

    let store = SqliteStore::open(ctx.db_path())?;
    // The manifest temp file is removed on drop, on every exit path.
    let manifest = build_allowed_signers(&store)?;

    for line in stdin.lines() {
        let line = line?;
        let Some(update) = parse_ref_update(&line) else {
            continue;
        };

        // Ref deletions carry nothing to verify.
        if is_zero_sha(&update.new) {
            continue;
        }

        for sha in new_commits(&ctx.repo_path, &update.old, &update.new)? {
            verify_commit(&ctx.repo_path, &sha, manifest.path())?;
        }
    }

    info!("pre-receive: all commits verified");
    Ok(())
}

/// Write one `* <public-key>` line per registered key. The wildcard
/// principal is deliberate: identity is fingerprint-based, not email-based.
pub fn build_allowed_signers(store: &dyn Store) -> Result<NamedTempFile> {
    let keys = store.list_keys()?;
    if keys.is_empty() {
        return Err(Error::Hook(
            "no signing keys registered; refusing push".to_string(),
        ));
    }

    let mut file = NamedTempFile::new()?;
    for key in &keys {
        writeln!(file, "* {}", key.public_key.trim())?;
    }
    file.flush()?;
    Ok(file)
}

/// List the commits a ref update introduces. A brand-new ref scans only the
/// commits unreachable from every existing ref; a fast-forward or rewrite
/// scans the exclusive `old..new` range.
fn new_commits(repo_path: &Path, old: &str, new: &str) -> Result<Vec<String>> {
    let mut command = Command::new("git");
    command.arg("-C").arg(repo_path).arg("rev-list");
    if is_zero_sha(old) {
        command.arg(new).arg("--not").arg("--all");
    } else {
        command.arg(format!("{old}..{new}"));
    }

    let output = command.output()?;
    if !output.status.success() {
        return Err(Error::Hook(format!(
            "git rev-list failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn verify_commit(repo_path: &Path, sha: &str, allowed_signers: &Path) -> Result<()> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .arg("-c")
        .arg(format!(
            "gpg.ssh.allowedSignersFile={}",
            allowed_signers.display()
        ))
        .arg("verify-commit")
        .arg(sha)
        .output()?;

    let short = &sha[..sha.len().min(7)];
    if !output.status.success() {
        debug!(
            sha = %short,
            output = %String::from_utf8_lossy(&output.stderr),
            "pre-receive: signature verification failed"
        );
        return Err(Error::Hook(format!(
            "commit {short}: unsigned or invalid signature"
        )));
    }

    debug!(sha = %short, "pre-receive: verified commit");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_keys(keys: &[(&str, &str)]) -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store.initialize().unwrap();
        for (i, (name, line)) in keys.iter().enumerate() {
            store
                .create_key(name, line, &format!("SHA256:key{i}"))
                .unwrap();
        }
        store
    }

    #[test]
    fn allowed_signers_uses_wildcard_principal() {
        let store = store_with_keys(&[
            ("laptop", "ssh-ed25519 AAAAC3Nz laptop@home"),
            ("ci", "ssh-rsa AAAAB3Nz"),
        ]);

        let manifest = build_allowed_signers(&store).unwrap();
        let contents = std::fs::read_to_string(manifest.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert!(line.starts_with("* "));
        }
        assert!(contents.contains("* ssh-rsa AAAAB3Nz"));
    }

    #[test]
    fn zero_keys_refuses_push() {
        let store = store_with_keys(&[]);
        let err = build_allowed_signers(&store).unwrap_err();
        assert!(err.to_string().contains("no signing keys"));
    }

    #[test]
    fn manifest_removed_on_drop() {
        let store = store_with_keys(&[("k", "ssh-ed25519 AAAA")]);
        let manifest = build_allowed_signers(&store).unwrap();
        let path = manifest.path().to_path_buf();
        assert!(path.exists());
        drop(manifest);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn manifest_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let store = store_with_keys(&[("k", "ssh-ed25519 AAAA")]);
        let manifest = build_allowed_signers(&store).unwrap();
        let mode = std::fs::metadata(manifest.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
