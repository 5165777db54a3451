mod error;
mod store;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use walkdir::WalkDir;

use crate::config::StorageSection;

pub use error::{PublishError, PublishResult};
pub use store::{ObjectStore, S3ObjectStore};

/// Uploads a completed output directory under a key prefix, file by file.
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    dry_run: bool,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, section: &StorageSection) -> Self {
        Self {
            store,
            bucket: section.bucket.clone(),
            dry_run: section.dry_run,
        }
    }

    /// Upload every regular file under `output_dir` to
    /// `<key_prefix>/<relative path>`. Uploads are independent; one
    /// failing file aborts the stage.
    pub async fn publish(&self, output_dir: &Path, key_prefix: &str) -> PublishResult<()> {
        for entry in WalkDir::new(output_dir) {
            let entry = entry.map_err(|source| PublishError::Walk {
                path: output_dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(output_dir)
                .expect("walked entries live under the walk root");
            let key = object_key(key_prefix, relative);
            let content_type = content_type(path);
            if self.dry_run {
                info!(
                    path = %path.display(),
                    bucket = %self.bucket,
                    key = %key,
                    content_type,
                    "dry-run: would upload"
                );
                continue;
            }
            info!(path = %path.display(), bucket = %self.bucket, key = %key, "uploading");
            self.store
                .upload_file(path, &self.bucket, &key, content_type)
                .await?;
        }
        info!(dir = %output_dir.display(), "publish complete");
        Ok(())
    }
}

/// Join prefix and relative path with forward slashes regardless of host
/// path conventions, keeping derived keys wire-stable.
pub(crate) fn object_key(prefix: &str, relative: &Path) -> String {
    let mut key = prefix.trim_matches('/').to_string();
    for component in relative.components() {
        key.push('/');
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    key
}

/// Extension-based content type with HLS-specific overrides first, then a
/// generic table, falling back to an opaque binary type.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/MP2T",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
