use std::path::PathBuf;

use url::Url;

use crate::error::{ConfigError, Result};

/// Immutable runtime configuration, loaded once at startup and handed to
/// each component at construction. Every recognized key is environment
/// sourced; required keys missing at startup abort before any event is
/// processed.
#[derive(Debug, Clone)]
pub struct VodforgeConfig {
    pub telegram: TelegramSection,
    pub storage: StorageSection,
    pub transcode: TranscodeSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone)]
pub struct TelegramSection {
    pub bot_token: String,
    pub api_base: String,
    /// Restrict intake to a single chat when set.
    pub watch_chat: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StorageSection {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: String,
    pub key_root: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct TranscodeSection {
    pub ffmpeg_path: PathBuf,
    pub segment_seconds: u32,
    pub multi_bitrate: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSection {
    pub workdir_root: PathBuf,
    pub public_base_url: String,
    pub cleanup: bool,
    pub max_attempts: u32,
    pub retry_delay_seconds: [u64; 2],
}

impl VodforgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` goes through here so
    /// tests can feed a plain map instead of mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram = TelegramSection {
            bot_token: required(&lookup, "TELEGRAM_BOT_TOKEN")?,
            api_base: optional(&lookup, "TELEGRAM_API_BASE", "https://api.telegram.org"),
            watch_chat: parse_optional(&lookup, "TELEGRAM_WATCH_CHAT")?,
        };
        let storage = StorageSection {
            bucket: required(&lookup, "STORAGE_BUCKET")?,
            access_key_id: required(&lookup, "STORAGE_ACCESS_KEY_ID")?,
            secret_access_key: required(&lookup, "STORAGE_SECRET_ACCESS_KEY")?,
            endpoint_url: endpoint_url(&lookup)?,
            key_root: key_root(optional(&lookup, "STORAGE_KEY_ROOT", "videos")),
            dry_run: parse_bool(&lookup, "UPLOAD_DRY_RUN", false)?,
        };
        let transcode = TranscodeSection {
            ffmpeg_path: PathBuf::from(optional(&lookup, "FFMPEG_PATH", "ffmpeg")),
            segment_seconds: parse_number(&lookup, "HLS_SEGMENT_TIME", 6)?,
            multi_bitrate: parse_bool(&lookup, "MULTIBITRATE", false)?,
        };
        let pipeline = PipelineSection {
            workdir_root: PathBuf::from(optional(&lookup, "WORKDIR", "./workdir")),
            public_base_url: public_base_url(&lookup)?,
            cleanup: parse_bool(&lookup, "CLEANUP", false)?,
            max_attempts: 3,
            retry_delay_seconds: [2, 20],
        };
        Ok(Self {
            telegram,
            storage,
            transcode,
            pipeline,
        })
    }
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar { name }),
    }
}

fn optional<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) if value.is_empty() => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidVar {
                name,
                value,
                reason: "expected a boolean".into(),
            }),
        },
    }
}

fn parse_number<F>(lookup: &F, name: &'static str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) if value.is_empty() => Ok(default),
        Some(value) => value.parse().map_err(|err| ConfigError::InvalidVar {
            name,
            value,
            reason: format!("expected an integer: {err}"),
        }),
    }
}

fn parse_optional<F>(lookup: &F, name: &'static str) -> Result<Option<i64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err| ConfigError::InvalidVar {
                name,
                value,
                reason: format!("expected a chat id: {err}"),
            }),
    }
}

/// Explicit endpoint wins; otherwise derive the R2-style endpoint from the
/// account id.
fn endpoint_url<F>(lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("STORAGE_ENDPOINT_URL").filter(|v| !v.is_empty()) {
        return Ok(url.trim_end_matches('/').to_string());
    }
    let account = required(lookup, "STORAGE_ACCOUNT_ID").map_err(|_| ConfigError::MissingVar {
        name: "STORAGE_ENDPOINT_URL",
    })?;
    Ok(format!("https://{account}.r2.cloudflarestorage.com"))
}

fn public_base_url<F>(lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = required(lookup, "PUBLIC_BASE_URL")?;
    if Url::parse(&raw).is_err() {
        return Err(ConfigError::InvalidVar {
            name: "PUBLIC_BASE_URL",
            value: raw,
            reason: "expected an absolute url".into(),
        });
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn key_root(value: String) -> String {
    let trimmed = value.trim_matches('/');
    if trimmed.is_empty() {
        "videos".to_string()
    } else {
        trimmed.to_string()
    }
}
