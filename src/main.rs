//! # colloquy
//!
//! Chat server binary. Loads configuration, opens the session database,
//! wires the Gemini engine into the chat service and serves HTTP until
//! interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;

use colloquy_engine::ChatService;
use colloquy_llm::GeminiEngine;
use colloquy_server::config::DEFAULT_CONFIG_FILE;
use colloquy_server::AppConfig;
use colloquy_store::{Database, SessionRepo};
use colloquy_telemetry::init_telemetry;

/// Colloquy chat server.
#[derive(Parser, Debug)]
#[command(name = "colloquy", about = "Session-aware chat server")]
struct Cli {
    /// JSON configuration file. Missing files fall back to defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Port to bind, overriding configuration (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

/// `GOOGLE_API_KEY` first, then `GEMINI_API_KEY`.
fn api_key() -> Result<SecretString> {
    ["GOOGLE_API_KEY", "GEMINI_API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .map(SecretString::from)
        .context("no API key: set GOOGLE_API_KEY or GEMINI_API_KEY")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    init_telemetry(&config.telemetry_config()?).context("Failed to initialize logging")?;

    let db = Database::open(&config.database_path).with_context(|| {
        format!("Failed to open database: {}", config.database_path.display())
    })?;
    let store = Arc::new(SessionRepo::new(db));

    let limits = config.limits.to_limits();
    let engine = GeminiEngine::new(api_key()?, config.agent.clone())
        .context("Failed to build Gemini client")?
        .with_base_url(config.gemini_base_url.clone())
        .with_idle_timeout(limits.idle_timeout);
    tracing::info!(agent = %config.agent.name, model = %config.agent.model, "engine ready");

    let service = Arc::new(ChatService::new(store, Arc::new(engine), config.chat_config()));

    let handle = colloquy_server::start(config.server_config(), service)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "colloquy ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
