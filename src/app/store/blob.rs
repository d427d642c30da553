//! Filesystem blob store
//!
//! Objects live under `<root>/objects/<key>` with a JSON metadata sidecar
//! at `<root>/meta/<key>.json`. Writes go to a uniquely named temporary
//! file first and are renamed into place, so readers never observe a
//! partially written object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, error, warn};
use url::Url;

use super::{BlobObject, BlobStore};
use crate::constants::storage;
use crate::errors::{BlobError, BlobResult};

const OBJECTS_DIR: &str = "objects";
const META_DIR: &str = "meta";

/// [`BlobStore`] backed by a local directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<Url>,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating directories as needed
    ///
    /// When `public_base_url` is set, [`BlobStore::url_for`] returns
    /// `<base>/<key>`; otherwise it returns a `file://` URL.
    pub async fn new(root: impl Into<PathBuf>, public_base_url: Option<Url>) -> BlobResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR)).await?;
        fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(Self {
            root,
            public_base_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read an object's bytes
    pub async fn read(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored key, sorted
    pub async fn list_keys(&self) -> BlobResult<Vec<String>> {
        let objects_root = self.root.join(OBJECTS_DIR);
        let mut keys = Vec::new();
        let mut pending = vec![objects_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path
                    .to_string_lossy()
                    .ends_with(storage::TEMP_FILE_SUFFIX)
                {
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&objects_root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn object_path(&self, key: &str) -> BlobResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(OBJECTS_DIR).join(key))
    }

    fn meta_path(&self, key: &str) -> BlobResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(META_DIR).join(format!("{}.json", key)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> BlobResult<BlobObject> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        let digest = format!("{:x}", md5::compute(bytes));

        if let Some(existing) = self.head(key).await? {
            if existing.md5 == digest && fs::try_exists(&object_path).await.unwrap_or(false) {
                debug!("Blob {} already stored with identical content", key);
                return Ok(existing);
            }
            warn!(
                "Overwriting blob {} (md5 {} -> {})",
                key, existing.md5, digest
            );
        }

        let object = BlobObject {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            md5: digest,
        };
        let meta = serde_json::to_vec_pretty(&object).map_err(|source| BlobError::Metadata {
            key: key.to_string(),
            source,
        })?;

        write_atomic(&object_path, bytes).await?;
        write_atomic(&meta_path, &meta).await?;

        debug!("Stored blob {} ({} bytes, {})", key, object.size, content_type);
        Ok(object)
    }

    async fn head(&self, key: &str) -> BlobResult<Option<BlobObject>> {
        let meta_path = self.meta_path(key)?;
        let content = match fs::read(&meta_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let object = serde_json::from_slice(&content).map_err(|source| BlobError::Metadata {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(object))
    }

    fn url_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.as_str().trim_end_matches('/'), key),
            None => {
                let path = self.root.join(OBJECTS_DIR).join(key);
                Url::from_file_path(&path)
                    .map(|url| url.to_string())
                    .unwrap_or_else(|_| path.display().to_string())
            }
        }
    }
}

/// Reject keys that are empty, absolute, or could escape the store root
fn validate_key(key: &str) -> BlobResult<()> {
    let invalid = || BlobError::InvalidKey {
        key: key.to_string(),
    };

    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(invalid());
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

/// Write to a unique temporary sibling, then rename over `final_path`
async fn write_atomic(final_path: &Path, content: &[u8]) -> BlobResult<()> {
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = final_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = final_path.with_file_name(format!(
        "{}.{:08x}{}",
        file_name,
        fastrand::u32(..),
        storage::TEMP_FILE_SUFFIX
    ));

    fs::write(&temp_path, content).await?;

    if let Err(e) = fs::rename(&temp_path, final_path).await {
        error!("Failed to rename temporary file: {}", e);
        let _ = fs::remove_file(&temp_path).await;
        return Err(BlobError::AtomicOperationFailed {
            temp_path,
            final_path: final_path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_store(base: Option<&str>) -> (FsBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let base = base.map(|b| Url::parse(b).unwrap());
        let store = FsBlobStore::new(temp_dir.path(), base).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_read() {
        let (store, _temp_dir) = create_test_store(None).await;

        let object = store
            .put("pixiv/42_p0.png", b"png-bytes", "image/png")
            .await
            .unwrap();
        assert_eq!(object.size, 9);
        assert_eq!(object.content_type, "image/png");
        assert_eq!(object.md5, format!("{:x}", md5::compute(b"png-bytes")));

        let bytes = store.read("pixiv/42_p0.png").await.unwrap().unwrap();
        assert_eq!(bytes, b"png-bytes");
        assert_eq!(
            store.head("pixiv/42_p0.png").await.unwrap(),
            Some(object)
        );
        assert_eq!(store.list_keys().await.unwrap(), vec!["pixiv/42_p0.png"]);
        assert!(store.read("pixiv/missing.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_put_is_idempotent() {
        let (store, _temp_dir) = create_test_store(None).await;
        let first = store.put("danbooru/7.jpg", b"abc", "image/jpeg").await.unwrap();
        let second = store.put("danbooru/7.jpg", b"abc", "image/jpeg").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_keys().await.unwrap().len(), 1);
    }

    /// Test concurrent writers
    ///
    /// Several writers storing the same key concurrently must leave exactly
    /// one complete object and no temporary files behind.
    #[tokio::test]
    async fn test_concurrent_puts_leave_one_object() {
        let (store, _temp_dir) = create_test_store(None).await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put("sankaku/9.webp", b"same-content", "image/webp")
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        assert_eq!(store.list_keys().await.unwrap(), vec!["sankaku/9.webp"]);
        assert_eq!(
            store.read("sankaku/9.webp").await.unwrap().unwrap(),
            b"same-content"
        );
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let (store, _temp_dir) = create_test_store(None).await;
        for key in ["", "/abs.png", "../escape.png", "a//b.png", "a/./b.png", "sp ace.png"] {
            let result = store.put(key, b"x", "image/png").await;
            assert!(
                matches!(result, Err(BlobError::InvalidKey { .. })),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_url_for() {
        let (store, _temp_dir) = create_test_store(Some("https://cdn.example.com/bucket/")).await;
        assert_eq!(
            store.url_for("pixiv/42_p0.png"),
            "https://cdn.example.com/bucket/pixiv/42_p0.png"
        );

        let (local, _temp_dir) = create_test_store(None).await;
        assert!(local.url_for("pixiv/42_p0.png").starts_with("file://"));
    }
}
