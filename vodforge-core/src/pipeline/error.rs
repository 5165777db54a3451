use std::path::PathBuf;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::publish::PublishError;
use crate::transcode::TranscodeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[source] GatewayError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
