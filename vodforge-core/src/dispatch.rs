//! Event intake: decide whether an inbound event is a video, derive its
//! stable item identity, and fan out one pipeline task per item without
//! blocking further intake.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::gateway::IncomingMediaEvent;
use crate::pipeline::ItemPipeline;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v"];

/// Video qualification, in priority order: explicit video flag, document
/// mime-type prefix, filename extension allow-list.
pub fn qualifies(event: &IncomingMediaEvent) -> bool {
    if event.video_flag {
        return true;
    }
    let Some(document) = &event.document else {
        return false;
    };
    if document
        .mime_type
        .as_deref()
        .is_some_and(|mime| mime.starts_with("video/"))
    {
        return true;
    }
    document.file_name.as_deref().is_some_and(|name| {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    })
}

/// Stable id: the document's content identifier when available, else a
/// chat/message composite. Pure over the event's identity fields, so the
/// same source message always maps to the same item.
pub fn item_id(event: &IncomingMediaEvent) -> String {
    if let Some(id) = event.document.as_ref().and_then(|doc| doc.id.as_deref()) {
        return id.to_string();
    }
    format!("{}_{}", event.chat_id, event.message_id)
}

/// Inferred input extension: filename attribute first, then the mime
/// subtype, then `.mp4`.
pub fn source_extension(event: &IncomingMediaEvent) -> String {
    if let Some(document) = &event.document {
        if let Some(name) = document.file_name.as_deref() {
            if let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) {
                return format!(".{}", ext.to_ascii_lowercase());
            }
            return ".mp4".to_string();
        }
        if let Some(minor) = document
            .mime_type
            .as_deref()
            .and_then(|mime| mime.strip_prefix("video/"))
        {
            if !minor.is_empty() {
                return format!(".{minor}");
            }
        }
    }
    ".mp4".to_string()
}

/// Launches one independent pipeline task per qualifying event. Dispatch
/// never waits on a pipeline, so intake of the next event is not
/// contingent on a prior item completing.
pub struct Dispatcher {
    pipeline: Arc<ItemPipeline>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<ItemPipeline>) -> Self {
        Self { pipeline }
    }

    /// Returns true when a pipeline instance was launched for the event.
    pub fn dispatch(&self, event: IncomingMediaEvent) -> bool {
        if !qualifies(&event) {
            debug!(
                chat = event.chat_id,
                message = event.message_id,
                "ignoring non-video event"
            );
            return false;
        }
        let id = item_id(&event);
        info!(item = %id, chat = event.chat_id, "launching item pipeline");
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            if let Err(error) = pipeline.run(event).await {
                error!(item = %id, %error, "item pipeline failed");
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DocumentInfo;

    fn event(document: Option<DocumentInfo>) -> IncomingMediaEvent {
        IncomingMediaEvent {
            chat_id: 42,
            message_id: 7,
            video_flag: false,
            document,
        }
    }

    #[test]
    fn video_flag_qualifies_without_document() {
        let mut ev = event(None);
        ev.video_flag = true;
        assert!(qualifies(&ev));
    }

    #[test]
    fn mime_prefix_qualifies() {
        let ev = event(Some(DocumentInfo {
            mime_type: Some("video/mp4".into()),
            ..Default::default()
        }));
        assert!(qualifies(&ev));
    }

    #[test]
    fn extension_allow_list_qualifies_case_insensitively() {
        let ev = event(Some(DocumentInfo {
            mime_type: Some("application/octet-stream".into()),
            file_name: Some("Holiday.MKV".into()),
            ..Default::default()
        }));
        assert!(qualifies(&ev));
    }

    #[test]
    fn plain_text_event_does_not_qualify() {
        assert!(!qualifies(&event(None)));
        let ev = event(Some(DocumentInfo {
            mime_type: Some("application/pdf".into()),
            file_name: Some("notes.pdf".into()),
            ..Default::default()
        }));
        assert!(!qualifies(&ev));
    }

    #[test]
    fn id_prefers_document_identifier() {
        let ev = event(Some(DocumentInfo {
            id: Some("9001".into()),
            ..Default::default()
        }));
        assert_eq!(item_id(&ev), "9001");
    }

    #[test]
    fn id_falls_back_to_chat_and_message() {
        assert_eq!(item_id(&event(None)), "42_7");
    }

    #[test]
    fn id_is_stable_across_repeats() {
        let ev = event(Some(DocumentInfo {
            id: Some("9001".into()),
            ..Default::default()
        }));
        assert_eq!(item_id(&ev), item_id(&ev.clone()));
    }

    #[test]
    fn extension_prefers_filename() {
        let ev = event(Some(DocumentInfo {
            mime_type: Some("video/webm".into()),
            file_name: Some("clip.MOV".into()),
            ..Default::default()
        }));
        assert_eq!(source_extension(&ev), ".mov");
    }

    #[test]
    fn extension_falls_back_to_mime_subtype() {
        let ev = event(Some(DocumentInfo {
            mime_type: Some("video/webm".into()),
            ..Default::default()
        }));
        assert_eq!(source_extension(&ev), ".webm");
    }

    #[test]
    fn extension_defaults_to_mp4() {
        assert_eq!(source_extension(&event(None)), ".mp4");
        let named_but_bare = event(Some(DocumentInfo {
            file_name: Some("video".into()),
            ..Default::default()
        }));
        assert_eq!(source_extension(&named_but_bare), ".mp4");
    }
}
