//! huddle-server binary: bind, accept, and hand connections off to the
//! per-connection handler.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use huddle_common::Identity;
use huddle_server::{
    handle_connection, InMemoryTokenVerifier, MemoryStore, ServerConfig, ServerState,
};

#[derive(Parser)]
#[command(name = "huddle-server", about = "WebSocket signaling and presence server")]
struct Args {
    /// Port to listen on (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match ServerConfig::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let verifier = InMemoryTokenVerifier::with_tokens(config.users.iter().map(|u| {
        (
            u.token.clone(),
            Identity::new(&u.user_id, &u.name, &u.email),
        )
    }));
    let store = Arc::new(MemoryStore::new(config.chat_history_limit));
    let state = ServerState::new(Arc::new(verifier), store, &config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("huddle-server listening on {}", addr);

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
