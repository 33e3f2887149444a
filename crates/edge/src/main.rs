use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hookly_domain::{generate_id, generate_token, ApiToken};
use hookly_edge::cli::{Cli, Command, TokenCommand};
use hookly_edge::config::EdgeConfig;
use hookly_edge::notify::{NoopNotifier, Notifier, TelegramNotifier};
use hookly_edge::relay::registry::ConnRegistry;
use hookly_edge::state::AppState;
use hookly_edge::tokens::{token_hash, TokenManager};
use hookly_edge::{dispatch, http, scheduler};
use hookly_store::{SecretCipher, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = EdgeConfig::from_env()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Token(TokenCommand::New { owner, name })) => {
            let config = EdgeConfig::from_env()?;
            mint_token(&config, &owner, &name)
        }
        Some(Command::Version) => {
            println!("hookly-edge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON logs for the server.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hookly_edge=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<EdgeConfig>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hookly edge starting");

    let store = Arc::new(
        Store::open(&config.database_path).with_context(|| {
            format!("opening database at {}", config.database_path.display())
        })?,
    );
    let cipher =
        Arc::new(SecretCipher::from_hex(&config.encryption_key).context("loading ENCRYPTION_KEY")?);
    let registry = Arc::new(ConnRegistry::new());
    let tokens = Arc::new(TokenManager::new(store.clone()));

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => {
            tracing::info!("telegram notifications enabled");
            Arc::new(TelegramNotifier::new(telegram.clone()))
        }
        None => {
            tracing::info!("no notification backend configured");
            Arc::new(NoopNotifier)
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState {
        config: config.clone(),
        store,
        cipher,
        registry,
        notifier,
        tokens,
        shutdown: shutdown.clone(),
    };

    tokio::spawn(dispatch::run_dispatcher(state.clone(), shutdown.child_token()));
    tokio::spawn(scheduler::run_scheduler(state.clone(), shutdown.child_token()));

    // Ctrl-C cancels the root token; tasks wind down and the HTTP server
    // drains its active handlers.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, base_url = %config.base_url, "hookly edge listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("serving HTTP")?;

    tracing::info!("hookly edge stopped");
    Ok(())
}

/// `token new`: write the hash, print the plaintext exactly once.
fn mint_token(config: &EdgeConfig, owner: &str, name: &str) -> anyhow::Result<()> {
    let store = Store::open(&config.database_path).with_context(|| {
        format!("opening database at {}", config.database_path.display())
    })?;

    let token = generate_token();
    store
        .insert_api_token(&ApiToken {
            id: generate_id(),
            owner_id: owner.to_string(),
            token_hash: token_hash(&token),
            name: name.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            revoked: false,
        })
        .context("storing token")?;

    println!("{token}");
    eprintln!("Token minted for owner {owner:?}. This is the only time it is shown.");
    Ok(())
}
