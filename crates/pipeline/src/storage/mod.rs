//! Media storage backends.
//!
//! Keys are relative media paths (already validated by the blueprint
//! boundary). The assembler fetches inputs into its scratch directory and
//! uploads the rendered video through the same trait.

mod local;
mod s3;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use choreo_core::config::{self, ConfigError};
use choreo_core::paths::MediaRoot;

pub use local::LocalStorage;
pub use s3::S3Storage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("media file not found: {key}")]
    NotFound { key: String },

    #[error("transient storage failure for {key}: {message}")]
    Transient { key: String, message: String },

    #[error("storage failure for {key}: {message}")]
    Permanent { key: String, message: String },

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub(crate) fn from_io(key: &str, e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound { key: key.to_string() },
            ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => Self::Transient {
                key: key.to_string(),
                message: e.to_string(),
            },
            _ => Self::Permanent {
                key: key.to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Where media lives.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Copy `key` to the local file `dest`.
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StorageError>;

    /// Store the local file `src` under `key` and return its URL.
    async fn upload(&self, src: &Path, key: &str) -> Result<String, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Public URL for `key`.
    fn url_for(&self, key: &str) -> String;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Local,
    S3 {
        bucket: String,
        endpoint: Option<String>,
        prefix: Option<String>,
    },
}

/// Storage configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub media_root: MediaRoot,
    pub backend: StorageBackend,
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    /// | Env Var                  | Default   |
    /// |--------------------------|-----------|
    /// | `CHOREO_MEDIA_ROOT`      | `./media` |
    /// | `CHOREO_STORAGE_BACKEND` | `local`   |
    /// | `CHOREO_S3_BUCKET`       | required for `s3` |
    /// | `CHOREO_S3_ENDPOINT`     | unset     |
    /// | `CHOREO_S3_PREFIX`       | unset     |
    /// | `CHOREO_PUBLIC_BASE_URL` | unset     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&config::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let media_root = MediaRoot::new(config::string_or(lookup, "CHOREO_MEDIA_ROOT", "./media"));
        let backend = match config::string_or(lookup, "CHOREO_STORAGE_BACKEND", "local").as_str() {
            "local" => StorageBackend::Local,
            "s3" => StorageBackend::S3 {
                bucket: config::require(lookup, "CHOREO_S3_BUCKET")?,
                endpoint: lookup("CHOREO_S3_ENDPOINT"),
                prefix: lookup("CHOREO_S3_PREFIX"),
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "CHOREO_STORAGE_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'local' or 's3'".to_string(),
                })
            }
        };
        Ok(Self {
            media_root,
            backend,
            public_base_url: lookup("CHOREO_PUBLIC_BASE_URL"),
        })
    }

    /// Construct the configured backend.
    pub async fn build(&self) -> Arc<dyn MediaStorage> {
        match &self.backend {
            StorageBackend::Local => Arc::new(LocalStorage::new(
                self.media_root.clone(),
                self.public_base_url.clone(),
            )),
            StorageBackend::S3 {
                bucket,
                endpoint,
                prefix,
            } => Arc::new(
                S3Storage::connect(
                    bucket.clone(),
                    endpoint.clone(),
                    prefix.clone(),
                    self.public_base_url.clone(),
                )
                .await,
            ),
        }
    }
}

/// Join a base URL and a key with exactly one slash.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
