//! Daemon wiring: loads configuration, builds the pipeline, and feeds it
//! from the Telegram update stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use vodforge_core::{
    event_from_message, Dispatcher, ItemPipeline, Publisher, S3ObjectStore, TelegramGateway,
    Transcoder, VodforgeConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

/// Backoff after a failed update poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodforge_core::ConfigError),
    #[error("env file error: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Watches a chat for videos and publishes HLS renditions", long_about = None)]
pub struct Cli {
    /// Env file loaded before reading configuration
    #[arg(long)]
    pub env_file: Option<PathBuf>,
    /// Log intended uploads without writing to object storage
    #[arg(long)]
    pub dry_run: bool,
    /// Override the working-directory root from the environment
    #[arg(long)]
    pub workdir: Option<PathBuf>,
    /// Drain the pending updates once and exit
    #[arg(long)]
    pub once: bool,
}

/// Command-line switches win over the environment.
fn apply_overrides(config: &mut VodforgeConfig, cli: &Cli) {
    if cli.dry_run {
        config.storage.dry_run = true;
    }
    if let Some(workdir) = &cli.workdir {
        config.pipeline.workdir_root = workdir.clone();
    }
}

/// `RUST_LOG` wins when set; `LOG_LEVEL` covers the simple "just turn the
/// daemon up to debug" case.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        tracing_subscriber::EnvFilter::new(level)
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    let mut config = VodforgeConfig::from_env()?;
    apply_overrides(&mut config, &cli);
    info!(
        bucket = %config.storage.bucket,
        workdir = %config.pipeline.workdir_root.display(),
        multi_bitrate = config.transcode.multi_bitrate,
        "configuration loaded"
    );

    let gateway = Arc::new(TelegramGateway::new(&config.telegram));
    let store = Arc::new(S3ObjectStore::new(&config.storage));
    let transcoder = Transcoder::new(&config.transcode);
    let publisher = Publisher::new(store, &config.storage);
    let pipeline = Arc::new(ItemPipeline::new(
        gateway.clone(),
        transcoder,
        publisher,
        &config,
    ));
    let dispatcher = Dispatcher::new(pipeline);

    let watch_chat = config.telegram.watch_chat;
    let mut offset = 0i64;
    info!(?watch_chat, "listening for updates");
    loop {
        let updates = match gateway.poll_updates(offset).await {
            Ok(updates) => updates,
            Err(error) => {
                warn!(%error, "update poll failed");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };
        for update in &updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message() else {
                continue;
            };
            let event = event_from_message(message);
            if watch_chat.is_some_and(|chat| chat != event.chat_id) {
                continue;
            }
            dispatcher.dispatch(event);
        }
        if cli.once {
            break;
        }
    }
    Ok(())
}
