//! Telegram Bot API client: the concrete [`MediaGateway`] plus a long-poll
//! update source for the daemon loop.

mod wire;

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::TelegramSection;
use crate::gateway::{GatewayError, IncomingMediaEvent, MediaGateway, ProgressFn};

pub use wire::{event_from_message, Update};

/// Seconds the server holds a `getUpdates` request open.
const POLL_TIMEOUT_SECS: u64 = 30;

pub struct TelegramGateway {
    http: Client,
    api_base: String,
    token: String,
}

impl TelegramGateway {
    pub fn new(section: &TelegramSection) -> Self {
        TelegramGateway {
            http: Client::new(),
            api_base: section.api_base.trim_end_matches('/').to_string(),
            token: section.bot_token.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token)
    }

    /// The Bot API reports failures inside the envelope rather than via the
    /// status code, so the body is parsed unconditionally.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T, GatewayError> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await?;
        let body: wire::ApiResponse<T> = response.json().await?;
        if !body.ok {
            return Err(GatewayError::Api(
                body.description
                    .unwrap_or_else(|| format!("{method} rejected")),
            ));
        }
        body.result
            .ok_or_else(|| GatewayError::Api(format!("{method} returned no result")))
    }

    /// Long-polls for new updates past `offset`. Returns raw updates so the
    /// caller can advance its offset from `update_id` even for updates it
    /// ignores.
    pub async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>, GatewayError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "channel_post"],
            }),
        )
        .await
    }
}

#[async_trait]
impl MediaGateway for TelegramGateway {
    async fn download_media(
        &self,
        event: &IncomingMediaEvent,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), GatewayError> {
        let file_id = event
            .document
            .as_ref()
            .and_then(|document| document.id.as_deref())
            .ok_or_else(|| GatewayError::Download("event carries no downloadable media".into()))?;

        let info: wire::FileInfo = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let file_path = info
            .file_path
            .ok_or_else(|| GatewayError::Download("file has no server-side path".into()))?;
        debug!(file_id, file_path = %file_path, "resolved media file");

        let response = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await?
            .error_for_status()?;
        let total = response
            .content_length()
            .or_else(|| event.document.as_ref().and_then(|document| document.size));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| GatewayError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| GatewayError::Io {
                source,
                path: dest.to_path_buf(),
            })?;

        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| GatewayError::Io {
                    source,
                    path: dest.to_path_buf(),
                })?;
            received += data.len() as u64;
            progress(received, total);
        }
        file.flush().await.map_err(|source| GatewayError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .call("sendMessage", &json!({ "chat_id": chat_id, "text": text }))
            .await
            .map_err(|error| match error {
                GatewayError::Api(message) => GatewayError::Send(message),
                other => other,
            })?;
        Ok(())
    }
}
