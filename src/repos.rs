//! Repository lifecycle: the bare directory and the store row are created
//! and destroyed together. The row is reserved first (UNIQUE name), the
//! directory materialized second, and both sides are rolled back when either
//! step fails, so the tree under `<data>/repos` never drifts from the store.

use std::path::Path;

use tokio::fs;
use tokio::process::Command;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hooks::install::install_hooks;
use crate::store::Store;
use crate::types::Repository;

const MAX_NAME_LEN: usize = 100;

pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidRepoName(name.to_string()));
    }
    if name.bytes().all(|b| b == b'.') {
        return Err(Error::InvalidRepoName(name.to_string()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::InvalidRepoName(name.to_string()));
    }
    Ok(())
}

pub async fn create_repository(
    config: &Config,
    store: &dyn Store,
    name: &str,
    description: Option<&str>,
    is_private: bool,
    default_branch: &str,
) -> Result<Repository> {
    validate_repo_name(name)?;

    // Reserve the name in the store before touching the filesystem.
    let repo = store.create_repo(name, description, is_private, default_branch)?;

    let repo_path = config.repo_path(name);
    if let Err(e) = materialize(&repo_path, default_branch).await {
        if store.delete_repo(name).is_err() {
            warn!(repo = name, "failed to roll back reserved repository row");
        }
        let _ = fs::remove_dir_all(&repo_path).await;
        return Err(e);
    }

    Ok(repo)
}

async fn materialize(repo_path: &Path, default_branch: &str) -> Result<()> {
    if let Some(parent) = repo_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let output = Command::new("git")
        .args(["init", "--bare"])
        .arg(repo_path)
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::GitService {
            service: "init",
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    fs::write(
        repo_path.join("HEAD"),
        format!("ref: refs/heads/{default_branch}\n"),
    )
    .await?;

    let binary = std::env::current_exe()?;
    install_hooks(repo_path, &binary).await?;

    Ok(())
}

/// Update the row first, then move the directory; revert the row when the
/// move fails so both sides stay consistent.
pub async fn rename_repository(
    config: &Config,
    store: &dyn Store,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    validate_repo_name(new_name)?;
    if store.get_repo(old_name)?.is_none() {
        return Err(Error::NotFound);
    }

    store.rename_repo(old_name, new_name)?;

    let old_path = config.repo_path(old_name);
    let new_path = config.repo_path(new_name);
    if let Err(e) = fs::rename(&old_path, &new_path).await {
        if store.rename_repo(new_name, old_name).is_err() {
            warn!(
                repo = old_name,
                "failed to revert repository row after directory move error"
            );
        }
        return Err(Error::Io(e));
    }

    Ok(())
}

pub async fn delete_repository(config: &Config, store: &dyn Store, name: &str) -> Result<()> {
    if !store.delete_repo(name)? {
        return Err(Error::NotFound);
    }

    let repo_path = config.repo_path(name);
    match fs::remove_dir_all(&repo_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
