//! Admin operations. The web UI is out of scope for the server core, so the
//! store mutations it would perform are exposed here instead, operating
//! directly on the local data directory.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::Config;
use crate::keys::parse_public_key;
use crate::repos;
use crate::store::Store;

pub async fn create_repo(
    config: &Config,
    store: &dyn Store,
    name: &str,
    description: Option<&str>,
    private: bool,
    default_branch: &str,
) -> Result<()> {
    let repo = repos::create_repository(config, store, name, description, private, default_branch)
        .await
        .with_context(|| format!("create repository {name}"))?;

    println!(
        "created repository '{}' at {}",
        repo.name,
        config.repo_path(&repo.name).display()
    );
    Ok(())
}

pub async fn rename_repo(
    config: &Config,
    store: &dyn Store,
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    repos::rename_repository(config, store, old_name, new_name)
        .await
        .with_context(|| format!("rename repository {old_name}"))?;
    println!("renamed '{old_name}' to '{new_name}'");
    Ok(())
}

pub async fn delete_repo(config: &Config, store: &dyn Store, name: &str) -> Result<()> {
    repos::delete_repository(config, store, name)
        .await
        .with_context(|| format!("delete repository {name}"))?;
    println!("deleted repository '{name}'");
    Ok(())
}

pub fn list_repos(store: &dyn Store) -> Result<()> {
    let repos = store.list_repos()?;
    if repos.is_empty() {
        println!("no repositories");
        return Ok(());
    }
    for repo in repos {
        let visibility = if repo.is_private { "private" } else { "public" };
        println!(
            "{:<30} {:<8} {}",
            repo.name,
            visibility,
            repo.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Register a signing key. The argument is either a path to a public key
/// file or a literal `<type> <base64> [comment]` line.
pub fn add_key(store: &dyn Store, name: &str, key_source: &str) -> Result<()> {
    let line = if Path::new(key_source).is_file() {
        std::fs::read_to_string(key_source)
            .with_context(|| format!("read key file {key_source}"))?
    } else {
        key_source.to_string()
    };

    let parsed = parse_public_key(&line)?;
    let fingerprint = parsed.fingerprint();
    let key = store.create_key(name, &parsed.canonical_line(), &fingerprint)?;

    println!("registered key '{}' ({})", key.name, key.fingerprint);
    Ok(())
}

pub fn remove_key(store: &dyn Store, fingerprint: &str) -> Result<()> {
    if !store.delete_key(fingerprint)? {
        bail!("no key with fingerprint {fingerprint}");
    }
    println!("removed key {fingerprint}");
    Ok(())
}

pub fn list_keys(store: &dyn Store) -> Result<()> {
    let keys = store.list_keys()?;
    if keys.is_empty() {
        println!("no signing keys registered");
        return Ok(());
    }
    for key in keys {
        println!("{:<20} {}", key.name, key.fingerprint);
    }
    Ok(())
}

pub fn add_webhook(
    store: &dyn Store,
    repo_name: &str,
    url: &str,
    secret: Option<&str>,
) -> Result<()> {
    let repo = store
        .get_repo(repo_name)?
        .with_context(|| format!("repository not found: {repo_name}"))?;

    let webhook = store.create_webhook(repo.id, url, secret)?;
    println!("added webhook #{} for '{}' -> {}", webhook.id, repo_name, webhook.url);
    Ok(())
}

pub fn remove_webhook(store: &dyn Store, id: i64) -> Result<()> {
    if !store.delete_webhook(id)? {
        bail!("no webhook with id {id}");
    }
    println!("removed webhook #{id}");
    Ok(())
}

pub fn list_webhooks(store: &dyn Store, repo_name: &str) -> Result<()> {
    let repo = store
        .get_repo(repo_name)?
        .with_context(|| format!("repository not found: {repo_name}"))?;

    let webhooks = store.list_webhooks(repo.id)?;
    if webhooks.is_empty() {
        println!("no webhooks for '{repo_name}'");
        return Ok(());
    }
    for webhook in webhooks {
        let secret = if webhook.secret.is_some() { "secret" } else { "no secret" };
        let active = if webhook.active { "active" } else { "inactive" };
        println!("#{:<5} {:<8} {:<10} {}", webhook.id, active, secret, webhook.url);
    }
    Ok(())
}
