use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::config::StorageSection;

use super::error::PublishError;

/// Object-storage seam. The pipeline only ever needs "put this local file
/// at this key with this content type"; transient-failure retries are the
/// store's own concern.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_file(
        &self,
        local: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), PublishError>;
}

/// S3-compatible store (R2 and friends) over the AWS SDK, which retries
/// transient failures internally per its standard retry configuration.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(section: &StorageSection) -> Self {
        let credentials = Credentials::new(
            section.access_key_id.clone(),
            section.secret_access_key.clone(),
            None,
            None,
            "vodforge",
        );
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&section.endpoint_url)
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .build();
        Self {
            client: Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload_file(
        &self,
        local: &Path,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<(), PublishError> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|err| PublishError::Upload {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|err| PublishError::Upload {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}
