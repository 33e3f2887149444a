//! The Hookly hub: the private-network consumer process.
//!
//! Dials out to the edge, receives webhooks for the endpoints in its
//! config, forwards them to local services, and acks. No inbound ports.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hookly_hub_sdk::{CredentialStore, HubConfig, HubError, RelayClient};

#[derive(Debug, Parser)]
#[command(name = "hookly-hub", about = "Hookly webhook relay consumer")]
struct Cli {
    /// Path to the hub config file.
    #[arg(long, global = true, default_value = "hub.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to the edge and relay webhooks (default).
    Serve,

    /// Prompt for the API token and store it encrypted next to the config.
    SetToken,

    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(&cli.config).await,
        Some(Command::SetToken) => set_token(&cli.config),
        Some(Command::Version) => {
            println!("hookly-hub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn credential_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    init_tracing();

    let config = HubConfig::load(config_path)?;
    let token = CredentialStore::new(&credential_dir(config_path)).load()?;
    let client = RelayClient::from_config(&config, token)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!(
        hub_id = %config.hub_id,
        edge = %config.edge_url,
        endpoints = config.endpoints.len(),
        "hookly hub starting"
    );

    match client.run(shutdown).await {
        Err(HubError::Shutdown) => {
            tracing::info!("hookly hub stopped");
            Ok(())
        }
        Err(HubError::Rejected(error)) => {
            // Auth errors are permanent: fix the token or the endpoint
            // list, don't let a retry loop hammer the edge.
            anyhow::bail!("the edge rejected this hub: {error}");
        }
        Err(e) => Err(e).context("relay client failed"),
        Ok(()) => Ok(()),
    }
}

fn set_token(config_path: &Path) -> anyhow::Result<()> {
    let token = rpassword::prompt_password_stdout("Hookly API token: ")
        .context("reading token from terminal")?;
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("no token entered");
    }

    let store = CredentialStore::new(&credential_dir(config_path));
    store.store(token)?;
    eprintln!("Token stored.");
    Ok(())
}
