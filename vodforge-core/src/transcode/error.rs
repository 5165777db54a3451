use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),
    #[error("ffmpeg failed for rendition {rendition} (status {status:?}): {output}")]
    Engine {
        rendition: String,
        status: Option<i32>,
        output: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
