//! Content-addressed raw image storage
//!
//! Images live under `<root>/images/` named by the SHA-256 of their bytes.
//! The reference stored on an Observation is `sha256:<hex>`, so identical
//! uploads share one file and a reference always identifies its content.

use accessmap_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::extractors::ImagePayload;

const REF_PREFIX: &str = "sha256:";

/// Result of [`ImageStore::store`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub reference: String,
    /// False when identical bytes were already on disk
    pub newly_written: bool,
}

/// Image store rooted at one directory
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Content reference for an image without storing it
    pub fn reference_for(image: &ImagePayload) -> String {
        format!("{}{:x}", REF_PREFIX, Sha256::digest(image.bytes()))
    }

    /// Persist the image (no-op when already stored) and return its reference
    pub async fn store(&self, image: &ImagePayload) -> Result<StoredImage> {
        let reference = Self::reference_for(image);
        let path = self.path_for(&reference)?;

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(reference = %reference, "Image already stored");
            return Ok(StoredImage {
                reference,
                newly_written: false,
            });
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so a crash never leaves a truncated image under its final name
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, image.bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }

        tracing::debug!(reference = %reference, bytes = image.len(), "Stored image");
        Ok(StoredImage {
            reference,
            newly_written: true,
        })
    }

    /// Delete a stored image; returns false when it was not there
    pub async fn remove(&self, reference: &str) -> Result<bool> {
        let path = self.path_for(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Read an image back by reference
    pub async fn load(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self.path_for(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("image {}", reference)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf> {
        let hex = reference
            .strip_prefix(REF_PREFIX)
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| Error::InvalidInput(format!("not an image reference: {}", reference)))?;
        Ok(self.dir.join(hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(extra: u8) -> ImagePayload {
        ImagePayload::sniff(vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, extra], 1024).unwrap()
    }

    #[tokio::test]
    async fn test_store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("images"));

        let first = store.store(&png(1)).await.unwrap();
        let again = store.store(&png(1)).await.unwrap();
        let other = store.store(&png(2)).await.unwrap();

        assert!(first.newly_written);
        assert!(!again.newly_written);
        let (first, again, other) = (first.reference, again.reference, other.reference);
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(first.starts_with("sha256:"));
        assert_eq!(first.len(), "sha256:".len() + 64);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 2);

        assert_eq!(store.load(&first).await.unwrap(), png(1).bytes());
    }

    #[tokio::test]
    async fn test_remove_deletes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());

        let stored = store.store(&png(3)).await.unwrap();
        assert!(store.remove(&stored.reference).await.unwrap());
        assert!(!store.remove(&stored.reference).await.unwrap());
        assert!(matches!(store.load(&stored.reference).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_bad_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());

        assert!(matches!(store.load("../etc/passwd").await, Err(Error::InvalidInput(_))));
        let missing = format!("sha256:{}", "0".repeat(64));
        assert!(matches!(store.load(&missing).await, Err(Error::NotFound(_))));
    }
}
