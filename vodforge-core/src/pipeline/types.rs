use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PipelineSection;
use crate::dispatch;
use crate::gateway::IncomingMediaEvent;

/// Where an item currently sits in the processing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Received,
    Downloading,
    Transcoding,
    Publishing,
    Completed,
    Failed,
}

/// One unit of work: a single video flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
    pub chat_id: i64,
    pub source_extension: String,
    pub work_dir: PathBuf,
    pub stage: ItemStage,
    pub last_error: Option<String>,
}

impl MediaItem {
    pub fn from_event(event: &IncomingMediaEvent, workdir_root: &Path) -> Self {
        let id = dispatch::item_id(event);
        let work_dir = workdir_root.join(&id);
        MediaItem {
            id,
            chat_id: event.chat_id,
            source_extension: dispatch::source_extension(event),
            work_dir,
            stage: ItemStage::Received,
            last_error: None,
        }
    }

    /// Path the source video is downloaded to.
    pub fn input_path(&self) -> PathBuf {
        self.work_dir.join(format!("input{}", self.source_extension))
    }

    /// Directory the transcoded HLS tree is written under.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("hls")
    }
}

/// Outcome summary returned once an item completes.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: String,
    pub stage: ItemStage,
    pub playlist_url: String,
    pub completed_at: DateTime<Utc>,
}

impl ItemReport {
    pub fn new(item_id: &str, playlist_url: String) -> Self {
        ItemReport {
            item_id: item_id.to_string(),
            stage: ItemStage::Completed,
            playlist_url,
            completed_at: Utc::now(),
        }
    }
}

/// Exponential backoff schedule for the retryable stages.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_section(section: &PipelineSection) -> Self {
        RetryPolicy {
            attempts: section.max_attempts.max(1),
            min_delay: Duration::from_secs(section.retry_delay_seconds[0]),
            max_delay: Duration::from_secs(section.retry_delay_seconds[1]),
        }
    }

    /// Delay to sleep after the given zero-based failed attempt: the
    /// minimum delay doubled per attempt, capped at the maximum.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DocumentInfo;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = policy();
        assert_eq!(policy.compute_delay(0), Duration::from_secs(2));
        assert_eq!(policy.compute_delay(1), Duration::from_secs(4));
        assert_eq!(policy.compute_delay(2), Duration::from_secs(8));
        assert_eq!(policy.compute_delay(3), Duration::from_secs(16));
    }

    #[test]
    fn delay_caps_at_maximum() {
        let policy = policy();
        assert_eq!(policy.compute_delay(4), Duration::from_secs(20));
        assert_eq!(policy.compute_delay(30), Duration::from_secs(20));
        assert_eq!(policy.compute_delay(u32::MAX), Duration::from_secs(20));
    }

    #[test]
    fn item_paths_derive_from_event() {
        let event = IncomingMediaEvent {
            chat_id: 42,
            message_id: 7,
            video_flag: false,
            document: Some(DocumentInfo {
                id: Some("abc123".into()),
                mime_type: Some("video/mp4".into()),
                file_name: Some("clip.mkv".into()),
                size: Some(1024),
            }),
        };
        let item = MediaItem::from_event(&event, Path::new("/tmp/work"));
        assert_eq!(item.id, "abc123");
        assert_eq!(item.work_dir, Path::new("/tmp/work/abc123"));
        assert_eq!(item.input_path(), Path::new("/tmp/work/abc123/input.mkv"));
        assert_eq!(item.output_dir(), Path::new("/tmp/work/abc123/hls"));
        assert_eq!(item.stage, ItemStage::Received);
    }

    #[test]
    fn item_without_document_falls_back_to_chat_message_id() {
        let event = IncomingMediaEvent {
            chat_id: 42,
            message_id: 7,
            video_flag: true,
            document: None,
        };
        let item = MediaItem::from_event(&event, Path::new("/work"));
        assert_eq!(item.id, "42_7");
        assert_eq!(item.input_path(), Path::new("/work/42_7/input.mp4"));
    }
}
