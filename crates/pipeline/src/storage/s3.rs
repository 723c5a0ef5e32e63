//! S3-compatible object storage.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use choreo_core::paths::check_relative_path;

use super::{join_url, MediaStorage, StorageError};

/// Service error codes worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "InternalError",
    "ServiceUnavailable",
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
];

const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NotFound"];

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    public_base_url: Option<String>,
}

impl S3Storage {
    pub fn new(
        client: Client,
        bucket: String,
        prefix: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket,
            prefix,
            public_base_url,
        }
    }

    /// Build a client from the ambient AWS configuration. A custom endpoint
    /// (MinIO and friends) switches to path-style addressing.
    pub async fn connect(
        bucket: String,
        endpoint: Option<String>,
        prefix: Option<String>,
        public_base_url: Option<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(url) = &endpoint {
            loader = loader.endpoint_url(url);
        }
        let shared = loader.load().await;
        let conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(endpoint.is_some())
            .build();

        tracing::info!(bucket = %bucket, endpoint = ?endpoint, "S3 storage configured");
        Self::new(Client::from_conf(conf), bucket, prefix, public_base_url)
    }

    fn object_key(&self, key: &str) -> Result<String, StorageError> {
        check_relative_path(key).map_err(StorageError::InvalidKey)?;
        let key = key.trim_start_matches("./");
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        })
    }
}

fn content_type(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

/// Map an SDK failure onto the retry classification.
fn classify<E, R>(key: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient {
                key: key.to_string(),
                message,
            }
        }
        SdkError::ServiceError(service) => {
            let code = service.err().code().unwrap_or_default();
            if NOT_FOUND_CODES.contains(&code) {
                StorageError::NotFound { key: key.to_string() }
            } else if TRANSIENT_CODES.contains(&code) {
                StorageError::Transient {
                    key: key.to_string(),
                    message,
                }
            } else {
                StorageError::Permanent {
                    key: key.to_string(),
                    message,
                }
            }
        }
        _ => StorageError::Permanent {
            key: key.to_string(),
            message,
        },
    }
}

#[async_trait]
impl MediaStorage for S3Storage {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let object_key = self.object_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes();

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        tracing::debug!(key, bytes = bytes.len(), "Fetched object from S3");
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<String, StorageError> {
        let object_key = self.object_key(key)?;
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::Permanent {
                key: key.to_string(),
                message: format!("cannot read {}: {e}", src.display()),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_type(content_type(key))
            .body(body)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        tracing::info!(bucket = %self.bucket, key = %object_key, "Uploaded object to S3");
        Ok(self.url_for(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let object_key = self.object_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(key, e) {
                StorageError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    fn url_for(&self, key: &str) -> String {
        let object_key = match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
            None => key.to_string(),
        };
        match &self.public_base_url {
            Some(base) => join_url(base, &object_key),
            None => format!("s3://{}/{}", self.bucket, object_key),
        }
    }
}
