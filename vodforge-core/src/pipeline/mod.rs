//! End-to-end processing of a single media item.
//!
//! The pipeline walks one item through download, transcode, and publish,
//! keeping every failure scoped to that item. Download failures are
//! terminal; transcode and publish are retried with exponential backoff.

mod error;
mod types;

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::VodforgeConfig;
use crate::gateway::{IncomingMediaEvent, MediaGateway};
use crate::ladder::{self, QualityPolicy};
use crate::publish::Publisher;
use crate::transcode::{Transcoder, PLAYLIST_NAME};

pub use error::{PipelineError, PipelineResult};
pub use types::{ItemReport, ItemStage, MediaItem, RetryPolicy};

const DEFAULT_RETRY_SLEEP_CAP: Duration = Duration::from_secs(60);
const PROGRESS_INTERVAL_BYTES: u64 = 50 * 1024 * 1024;

/// Orchestrates the download -> transcode -> publish sequence for one item.
pub struct ItemPipeline {
    gateway: Arc<dyn MediaGateway>,
    transcoder: Transcoder,
    publisher: Publisher,
    quality: QualityPolicy,
    workdir_root: PathBuf,
    key_root: String,
    public_base_url: String,
    cleanup: bool,
    retry: RetryPolicy,
    retry_sleep_cap: Duration,
}

impl ItemPipeline {
    pub fn new(
        gateway: Arc<dyn MediaGateway>,
        transcoder: Transcoder,
        publisher: Publisher,
        config: &VodforgeConfig,
    ) -> Self {
        ItemPipeline {
            gateway,
            transcoder,
            publisher,
            quality: QualityPolicy::from_multi_flag(config.transcode.multi_bitrate),
            workdir_root: config.pipeline.workdir_root.clone(),
            key_root: config.storage.key_root.clone(),
            public_base_url: config.pipeline.public_base_url.clone(),
            cleanup: config.pipeline.cleanup,
            retry: RetryPolicy::from_section(&config.pipeline),
            retry_sleep_cap: DEFAULT_RETRY_SLEEP_CAP,
        }
    }

    /// Caps the backoff sleep between retries. Tests use this to keep
    /// retry scenarios fast.
    pub fn with_retry_sleep_cap(mut self, cap: Duration) -> Self {
        self.retry_sleep_cap = cap;
        self
    }

    /// Runs the full sequence for one event. The chat is notified at each
    /// stage transition and on the final outcome.
    pub async fn run(&self, event: IncomingMediaEvent) -> PipelineResult<ItemReport> {
        let mut item = MediaItem::from_event(&event, &self.workdir_root);
        info!(item = %item.id, chat = event.chat_id, "processing item");

        match self.process(&event, &mut item).await {
            Ok(playlist_url) => {
                item.stage = ItemStage::Completed;
                info!(item = %item.id, url = %playlist_url, "item completed");
                self.notify(item.chat_id, &format!("✅ Ready: {playlist_url}"))
                    .await;
                if self.cleanup {
                    self.cleanup_work_dir(&item);
                }
                Ok(ItemReport::new(&item.id, playlist_url))
            }
            Err(error) => {
                item.stage = ItemStage::Failed;
                item.last_error = Some(error.to_string());
                warn!(item = %item.id, %error, "item failed");
                self.notify(
                    item.chat_id,
                    &format!("❌ Failed to process video: {error}"),
                )
                .await;
                Err(error)
            }
        }
    }

    async fn process(
        &self,
        event: &IncomingMediaEvent,
        item: &mut MediaItem,
    ) -> PipelineResult<String> {
        self.prepare_work_dir(item).await?;

        item.stage = ItemStage::Downloading;
        self.notify(
            item.chat_id,
            &format!("⏳ Received video {}. Downloading…", item.id),
        )
        .await;
        self.download(event, item).await?;

        item.stage = ItemStage::Transcoding;
        self.notify(item.chat_id, &format!("🎬 Transcoding {} to HLS…", item.id))
            .await;
        let plan = ladder::plan(self.quality);
        let input = item.input_path();
        let output = item.output_dir();
        self.retry_operation("transcode", || async {
            self.transcoder
                .transcode(&input, &output, &plan)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        item.stage = ItemStage::Publishing;
        self.notify(item.chat_id, &format!("📤 Uploading {}…", item.id))
            .await;
        let key_prefix = format!("{}/{}", self.key_root, item.id);
        self.retry_operation("publish", || async {
            self.publisher
                .publish(&output, &key_prefix)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        Ok(self.playlist_url(&item.id))
    }

    /// Resubmitting an item id starts from a clean slate.
    async fn prepare_work_dir(&self, item: &MediaItem) -> PipelineResult<()> {
        match tokio::fs::remove_dir_all(&item.work_dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(PipelineError::Io {
                    source,
                    path: item.work_dir.clone(),
                })
            }
        }
        tokio::fs::create_dir_all(&item.work_dir)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: item.work_dir.clone(),
            })
    }

    async fn download(
        &self,
        event: &IncomingMediaEvent,
        item: &MediaItem,
    ) -> PipelineResult<()> {
        let input = item.input_path();
        let item_id = item.id.clone();
        let last_bucket = AtomicU64::new(u64::MAX);
        let progress = move |received: u64, total: Option<u64>| {
            let bucket = received / PROGRESS_INTERVAL_BYTES;
            let finished = total.is_some_and(|t| received >= t);
            if last_bucket.swap(bucket, Ordering::Relaxed) != bucket || finished {
                match total {
                    Some(total) if total > 0 => info!(
                        item = %item_id,
                        received,
                        total,
                        percent = received * 100 / total,
                        "downloading"
                    ),
                    _ => info!(item = %item_id, received, "downloading"),
                }
            }
        };
        self.gateway
            .download_media(event, &input, &progress)
            .await
            .map_err(PipelineError::Download)
    }

    async fn retry_operation<F, Fut, T>(&self, label: &str, mut operation: F) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(error);
                    }
                    let delay = self.retry.compute_delay(attempt - 1).min(self.retry_sleep_cap);
                    warn!(attempt, wait = ?delay, stage = label, %error, "retrying operation");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }

    fn playlist_url(&self, item_id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.public_base_url, self.key_root, item_id, PLAYLIST_NAME
        )
    }

    /// Best-effort chat notification. Failures are logged, never propagated.
    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(error) = self.gateway.send_message(chat_id, text).await {
            warn!(chat = chat_id, %error, "notification failed");
        }
    }

    /// Removes files first, then directories bottom-up. Each failure is
    /// logged and skipped so cleanup never masks the item's outcome.
    fn cleanup_work_dir(&self, item: &MediaItem) {
        for entry in WalkDir::new(&item.work_dir).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(item = %item.id, %error, "cleanup walk failed");
                    continue;
                }
            };
            let result = if entry.file_type().is_dir() {
                std::fs::remove_dir(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            if let Err(error) = result {
                warn!(path = %entry.path().display(), %error, "cleanup failed");
            }
        }
    }
}

impl std::fmt::Debug for ItemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPipeline")
            .field("quality", &self.quality)
            .field("workdir_root", &self.workdir_root)
            .field("key_root", &self.key_root)
            .field("cleanup", &self.cleanup)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
