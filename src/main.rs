use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use origin::AppState;
use origin::config::Config;
use origin::hooks;
use origin::server::start_http_server;
use origin::ssh::start_ssh_server;
use origin::store::{SqliteStore, Store};
use origin::cli;

#[derive(Parser)]
#[command(name = "origin")]
#[command(about = "A single-tenant, self-hosted git forge server", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the SSH and HTTP servers
    Serve,

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create a repository (bare directory + store row)
    CreateRepo {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        private: bool,
        #[arg(long, default_value = "main")]
        default_branch: String,
    },
    /// Rename a repository
    RenameRepo { old_name: String, new_name: String },
    /// Delete a repository and its webhooks
    DeleteRepo { name: String },
    /// List repositories
    ListRepos,

    /// Register an SSH signing key (path to a .pub file, or a literal line)
    AddKey {
        #[arg(long)]
        name: String,
        key: String,
    },
    /// Remove a signing key by fingerprint
    RemoveKey { fingerprint: String },
    /// List registered signing keys
    ListKeys,

    /// Add a webhook to a repository
    AddWebhook {
        repo: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        secret: Option<String>,
    },
    /// Remove a webhook by id
    RemoveWebhook { id: i64 },
    /// List a repository's webhooks
    ListWebhooks { repo: String },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("origin=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Hook mode is detected before any flag or config handling: the hook
    // scripts run in a constrained environment and share this binary path.
    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 3 && args[1] == "hook" {
        return run_hook(&args[2]).await;
    }

    init_tracing();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli_args.config).context("load configuration")?;
    config
        .ensure_directories()
        .context("create data directories")?;

    let store = SqliteStore::open(config.db_path()).context("open database")?;
    store.initialize().context("migrate database")?;

    match cli_args.command {
        Commands::Serve => serve(config, store).await,
        Commands::Admin { command } => admin(config, store, command).await,
    }
}

async fn serve(config: Config, store: SqliteStore) -> anyhow::Result<()> {
    info!(
        name = %config.name,
        data_path = %config.data_path.display(),
        ssh_addr = %config.ssh.listen_addr,
        http_addr = %config.http.listen_addr,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        config: Arc::new(config),
        store: Arc::new(store),
        shutdown: shutdown.clone(),
    });

    let ssh_handle = tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = start_ssh_server(state, shutdown).await {
                error!("SSH server failed: {e:#}");
            }
        }
    });

    let http_handle = tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = start_http_server(state, shutdown).await {
                error!("HTTP server failed: {e:#}");
            }
        }
    });

    info!("{} is ready", state.config.name);

    shutdown_signal().await;
    info!("shutting down...");
    shutdown.cancel();

    let _ = tokio::join!(ssh_handle, http_handle);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

async fn admin(config: Config, store: SqliteStore, command: AdminCommands) -> anyhow::Result<()> {
    let store: &dyn Store = &store;
    match command {
        AdminCommands::CreateRepo {
            name,
            description,
            private,
            default_branch,
        } => {
            cli::create_repo(
                &config,
                store,
                &name,
                description.as_deref(),
                private,
                &default_branch,
            )
            .await
        }
        AdminCommands::RenameRepo { old_name, new_name } => {
            cli::rename_repo(&config, store, &old_name, &new_name).await
        }
        AdminCommands::DeleteRepo { name } => cli::delete_repo(&config, store, &name).await,
        AdminCommands::ListRepos => cli::list_repos(store),
        AdminCommands::AddKey { name, key } => cli::add_key(store, &name, &key),
        AdminCommands::RemoveKey { fingerprint } => cli::remove_key(store, &fingerprint),
        AdminCommands::ListKeys => cli::list_keys(store),
        AdminCommands::AddWebhook { repo, url, secret } => {
            cli::add_webhook(store, &repo, &url, secret.as_deref())
        }
        AdminCommands::RemoveWebhook { id } => cli::remove_webhook(store, id),
        AdminCommands::ListWebhooks { repo } => cli::list_webhooks(store, &repo),
    }
}

/// Hook-mode entrypoint. Stderr reaches the pusher through git, so the
/// rejection line must be the one thing a human needs to see.
async fn run_hook(hook_name: &str) -> ExitCode {
    init_tracing();

    let stdin = std::io::stdin();
    match hook_name {
        "pre-receive" => match hooks::pre_receive::verify(stdin.lock()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("origin: push rejected — {e}");
                ExitCode::FAILURE
            }
        },
        "post-receive" => {
            if let Err(e) = hooks::post_receive::run(stdin.lock()).await {
                error!("post-receive hook error: {e}");
            }
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("origin: unknown hook: {other}");
            ExitCode::FAILURE
        }
    }
}
