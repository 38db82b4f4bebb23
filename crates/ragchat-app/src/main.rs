//! ragchat: document chat server.
//!
//! Composition root: resolves configuration, initializes tracing, picks the
//! model providers and starts the HTTP API.

mod cli;

use clap::Parser;

use ragchat_api::{AppState, AuthGate};
use ragchat_chat::Capabilities;
use ragchat_core::config::{resolve_data_dir, RagChatConfig};
use ragchat_core::error::RagChatError;

use crate::cli::{CliArgs, Command};

/// Fold CLI overrides into a config that already has the file and env applied.
fn apply_cli(args: &CliArgs, config: &mut RagChatConfig) {
    if let Some(ref host) = args.host {
        config.general.host = host.clone();
    }
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    config.general.log_level = args.resolve_log_level(&config.general.log_level);
}

/// Offline mode needs no provider settings, only the signing secret.
fn validate(config: &RagChatConfig, offline: bool) -> Result<(), RagChatError> {
    if !offline {
        return config.validate();
    }
    if config.auth.secret.is_empty() {
        return Err(RagChatError::Config(
            "missing required settings: auth.secret (APP_SECRET)".to_string(),
        ));
    }
    if config.index.chunk_overlap >= config.index.chunk_size {
        return Err(RagChatError::Config(format!(
            "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
            config.index.chunk_overlap, config.index.chunk_size
        )));
    }
    Ok(())
}

fn print_token(config: &RagChatConfig, uid: &str, ttl_minutes: i64) -> Result<(), RagChatError> {
    if config.auth.secret.is_empty() {
        return Err(RagChatError::Config(
            "cannot sign a token without auth.secret (APP_SECRET)".to_string(),
        ));
    }
    let exp = chrono::Utc::now() + chrono::Duration::minutes(ttl_minutes);
    let claims = serde_json::json!({ "uid": uid, "exp": exp.timestamp() });
    println!("{}", AuthGate::new(&config.auth.secret).sign(&claims));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config: file, then env, then CLI.
    let config_file = args.resolve_config_path();
    let mut config = RagChatConfig::load_or_default(&config_file);
    config.apply_env();
    apply_cli(&args, &mut config);

    if let Some(Command::Token { ref uid, ttl_minutes }) = args.command {
        print_token(&config, uid, ttl_minutes)?;
        return Ok(());
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting ragchat v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    if let Err(e) = validate(&config, args.offline) {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let capabilities = if args.offline {
        tracing::warn!("Offline mode: replies echo the prompt and retrieval uses hash embeddings");
        Capabilities::offline()
    } else {
        Capabilities::from_config(&config)?
    };
    tracing::info!(?capabilities, "Model providers ready");

    let state = AppState::new(config, capabilities);
    ragchat_api::start_server(state).await?;

    Ok(())
}
