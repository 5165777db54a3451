use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("upload failed for key {key}: {reason}")]
    Upload { key: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type PublishResult<T> = Result<T, PublishError>;
