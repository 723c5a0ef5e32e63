//! Pipeline configuration: storage, fetch and encoder settings in one
//! place, plus the wiring that turns them into a [`JobRunner`].

use std::sync::Arc;

use choreo_core::config::{self, ConfigError};
use choreo_core::task::TaskStatusStore;

use crate::assembler::{AssemblerConfig, VideoAssembler};
use crate::ffmpeg::{FfmpegConfig, FfmpegEncoder};
use crate::job::JobRunner;
use crate::storage::StorageConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub assembler: AssemblerConfig,
    pub ffmpeg: FfmpegConfig,
}

impl PipelineConfig {
    /// Load from the process environment. See [`StorageConfig::from_lookup`],
    /// [`AssemblerConfig::from_lookup`] and [`FfmpegConfig::from_lookup`]
    /// for the variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&config::process_env)
    }

    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            storage: StorageConfig::from_lookup(lookup)?,
            assembler: AssemblerConfig::from_lookup(lookup)?,
            ffmpeg: FfmpegConfig::from_lookup(lookup)?,
        })
    }

    /// Assembler reporting progress to `store`, wrapped in a job runner.
    pub async fn build_runner(&self, store: Arc<dyn TaskStatusStore>) -> JobRunner {
        let storage = self.storage.build().await;
        let encoder = Arc::new(FfmpegEncoder::new(self.ffmpeg.clone()));
        let assembler = VideoAssembler::new(storage, encoder, self.assembler.clone())
            .with_status_store(store.clone());
        JobRunner::new(Arc::new(assembler), store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn reads_every_section() {
        let map: HashMap<&str, &str> = HashMap::from([
            ("CHOREO_MEDIA_ROOT", "/srv/media"),
            ("CHOREO_FETCH_CONCURRENCY", "8"),
            ("CHOREO_ENCODE_TIMEOUT_SECS", "600"),
            ("CHOREO_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
        ]);
        let lookup = |k: &str| map.get(k).map(|v| v.to_string());
        let cfg = PipelineConfig::from_lookup(&lookup).unwrap();

        assert_eq!(cfg.storage.media_root.path(), std::path::Path::new("/srv/media"));
        assert_eq!(cfg.assembler.fetch_concurrency, 8);
        assert_eq!(cfg.assembler.fetch_timeout, Duration::from_secs(60));
        assert_eq!(cfg.ffmpeg.encode_timeout, Duration::from_secs(600));
        assert_eq!(cfg.ffmpeg.ffmpeg_path, std::path::PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn invalid_value_names_the_variable() {
        let lookup = |k: &str| (k == "CHOREO_FETCH_TIMEOUT_SECS").then(|| "soon".to_string());
        let err = PipelineConfig::from_lookup(&lookup).unwrap_err();
        assert!(err.to_string().contains("CHOREO_FETCH_TIMEOUT_SECS"));
    }
}
