//! Serde mappings for the subset of the Bot API the gateway touches.

use serde::Deserialize;

use crate::gateway::{DocumentInfo, IncomingMediaEvent};

/// Every Bot API response arrives wrapped in this envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub channel_post: Option<Message>,
}

impl Update {
    /// Chat and channel posts carry the same payload shape.
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref().or(self.channel_post.as_ref())
    }
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub video: Option<MediaAttachment>,
    #[serde(default)]
    pub document: Option<MediaAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Common fields of the `video` and `document` attachment objects.
#[derive(Debug, Deserialize)]
pub struct MediaAttachment {
    pub file_id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Result of `getFile`.
#[derive(Debug, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Flattens a message into the event shape the dispatcher understands.
pub fn event_from_message(message: &Message) -> IncomingMediaEvent {
    let attachment = message.video.as_ref().or(message.document.as_ref());
    IncomingMediaEvent {
        chat_id: message.chat.id,
        message_id: message.message_id,
        video_flag: message.video.is_some(),
        document: attachment.map(|media| DocumentInfo {
            id: Some(media.file_id.clone()),
            mime_type: media.mime_type.clone(),
            file_name: media.file_name.clone(),
            size: media.file_size,
        }),
    }
}
