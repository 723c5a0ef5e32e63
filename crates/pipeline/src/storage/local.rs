//! Filesystem-backed storage rooted at the media directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use choreo_core::paths::MediaRoot;

use super::{join_url, MediaStorage, StorageError};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: MediaRoot,
    public_base_url: Option<String>,
}

impl LocalStorage {
    pub fn new(root: MediaRoot, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        self.root
            .resolve(key)
            .map_err(|e| StorageError::InvalidKey(e.to_string()))
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    async fn fetch(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let src = self.resolve(key)?;
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<String, StorageError> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(key, e))?;
        }

        // Copy next to the destination, then rename, so readers never see a
        // half-written render.
        let partial = dest.with_extension("partial");
        tokio::fs::copy(src, &partial)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;

        tracing::debug!(key, dest = %dest.display(), "Stored file locally");
        Ok(self.url_for(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))
    }

    fn url_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => join_url(base, key),
            None => format!("file://{}", self.root.path().join(key).display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn storage(dir: &tempfile::TempDir, base: Option<&str>) -> LocalStorage {
        LocalStorage::new(MediaRoot::new(dir.path()), base.map(str::to_string))
    }

    #[tokio::test]
    async fn fetch_copies_into_destination() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("clips")).unwrap();
        std::fs::write(root.path().join("clips/a.mp4"), b"video").unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let dest = scratch.path().join("a.mp4");
        storage(&root, None).fetch("clips/a.mp4", &dest).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"video");
    }

    #[tokio::test]
    async fn fetch_missing_key_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let err = storage(&root, None)
            .fetch("clips/missing.mp4", &scratch.path().join("x.mp4"))
            .await
            .unwrap_err();
        assert_matches!(err, StorageError::NotFound { key } if key == "clips/missing.mp4");
    }

    #[tokio::test]
    async fn escaping_keys_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let err = storage(&root, None)
            .fetch("../etc/passwd", &scratch.path().join("x"))
            .await
            .unwrap_err();
        assert_matches!(err, StorageError::InvalidKey(_));
    }

    #[tokio::test]
    async fn upload_creates_parents_and_returns_url() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let src = scratch.path().join("out.mp4");
        std::fs::write(&src, b"render").unwrap();

        let store = storage(&root, Some("https://cdn.example/media"));
        let url = store.upload(&src, "renders/t1.mp4").await.unwrap();

        assert_eq!(url, "https://cdn.example/media/renders/t1.mp4");
        assert_eq!(std::fs::read(root.path().join("renders/t1.mp4")).unwrap(), b"render");
        assert!(!root.path().join("renders/t1.partial").exists());
        assert!(store.exists("renders/t1.mp4").await.unwrap());
    }

    #[test]
    fn url_without_base_is_file_url() {
        let root = tempfile::tempdir().unwrap();
        let url = storage(&root, None).url_for("renders/t1.mp4");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("renders/t1.mp4"));
    }
}
