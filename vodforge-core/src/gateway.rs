//! Boundary with the external messaging collaborator. The pipeline only
//! depends on this trait; the concrete Telegram client lives in
//! [`crate::telegram`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// One inbound event from the messaging source, reduced to the fields the
/// dispatcher and pipeline care about.
#[derive(Debug, Clone)]
pub struct IncomingMediaEvent {
    pub chat_id: i64,
    pub message_id: i64,
    /// Set when the source marks the payload as a native video.
    pub video_flag: bool,
    pub document: Option<DocumentInfo>,
}

/// Attached document metadata, when the event carries one.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    /// Source-side content identifier; doubles as the download handle.
    pub id: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Progress callback: bytes received so far and total size when known.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Stream the event's media payload into `dest`, reporting progress
    /// as bytes arrive.
    async fn download_media(
        &self,
        event: &IncomingMediaEvent,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), GatewayError>;

    /// Post a text message back to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;
}
