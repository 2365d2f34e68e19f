//! Post-receive dispatch: refresh the dumb-HTTP index and fan out webhooks.
//! By the time this runs the push has already succeeded, so nothing in here
//! is allowed to fail it.

use std::io::BufRead;
use std::process::Command;

use tokio::task::JoinSet;
use tracing::{error, warn};

use super::{HookContext, parse_ref_update};
use crate::error::Result;
use crate::store::{SqliteStore, Store};
use crate::types::PushEvent;
use crate::webhook::Dispatcher;

pub async fn run(stdin: impl BufRead) -> Result<()> {
    let ctx = HookContext::from_env()?;

    // Keep dumb-HTTP mirrors working; ignore failures.
    let _ = Command::new("git")
        .arg("-C")
        .arg(&ctx.repo_path)
        .arg("update-server-info")
        .status();

    let store = match SqliteStore::open(ctx.db_path()) {
        Ok(s) => s,
        Err(e) => {
            error!("post-receive: open store: {e}");
            return Ok(());
        }
    };

    let webhooks = match store.list_active_webhooks(&ctx.repo_name) {
        Ok(w) => w,
        Err(e) => {
            error!("post-receive: load webhooks: {e}");
            return Ok(());
        }
    };

    if webhooks.is_empty() {
        return Ok(());
    }

    let dispatcher = match Dispatcher::new() {
        Ok(d) => d,
        Err(e) => {
            error!("post-receive: {e}");
            return Ok(());
        }
    };

    let mut deliveries = JoinSet::new();
    for line in stdin.lines() {
        let Ok(line) = line else { break };
        let Some(update) = parse_ref_update(&line) else {
            continue;
        };

        let event = PushEvent::push(
            &ctx.repo_name,
            &update.ref_name,
            &update.old,
            &update.new,
            &ctx.pusher_fingerprint,
        );
        dispatcher.deliver(&mut deliveries, &webhooks, &event);
    }

    // Deliveries run concurrently and each request carries a 5-second
    // timeout, so this drain bounds the hook's lifetime rather than
    // serializing the fan-out.
    while let Some(joined) = deliveries.join_next().await {
        if let Err(e) = joined {
            warn!("post-receive: delivery task panicked: {e}");
        }
    }

    Ok(())
}
