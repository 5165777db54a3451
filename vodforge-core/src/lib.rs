pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod ladder;
pub mod pipeline;
pub mod publish;
pub mod telegram;
pub mod transcode;

pub use config::{
    PipelineSection, StorageSection, TelegramSection, TranscodeSection, VodforgeConfig,
};
pub use dispatch::Dispatcher;
pub use error::{ConfigError, Result};
pub use gateway::{DocumentInfo, GatewayError, IncomingMediaEvent, MediaGateway};
pub use ladder::{plan, QualityPolicy, Rendition, RenditionPlan};
pub use pipeline::{
    ItemPipeline, ItemReport, ItemStage, MediaItem, PipelineError, PipelineResult, RetryPolicy,
};
pub use publish::{ObjectStore, PublishError, PublishResult, Publisher, S3ObjectStore};
pub use telegram::{event_from_message, TelegramGateway, Update};
pub use transcode::{
    EngineExecutor, EngineOutput, OutputManifest, SystemEngineExecutor, TranscodeError,
    TranscodeResult, Transcoder,
};
