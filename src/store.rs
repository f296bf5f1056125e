use async_trait::async_trait;

use crate::errors::MirrorError;

/// One entry of a hierarchical listing directly under a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// Sub-prefix ending with `/`, one directory level
    Prefix(String),
    /// Full key of an object
    Blob(String),
}

impl ListEntry {
    pub fn key(&self) -> &str {
        match self {
            ListEntry::Prefix(p) => p,
            ListEntry::Blob(k) => k,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Flat `/` delimited key space the mirror reads from and writes into
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Entries directly under `prefix` using `/` as delimiter, sorted by key
    async fn list_by_hierarchy(&self, prefix: &str) -> Result<Vec<ListEntry>, MirrorError>;

    async fn download(&self, key: &str) -> Result<Blob, MirrorError>;

    /// Empty content type leaves the store default in place
    async fn upload(&self, key: &str, content: &[u8], content_type: &str) -> Result<(), MirrorError>;
}

pub struct S3Store {
    bucket: s3::Bucket,
}

impl S3Store {
    pub fn new(bucket: s3::Bucket) -> Self {
        S3Store { bucket }
    }
}

fn check_status(key: &str, status: u16) -> Result<(), MirrorError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(MirrorError::Storage(format!(
            "Storage request for {key} failed with status {status}"
        )))
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn list_by_hierarchy(&self, prefix: &str) -> Result<Vec<ListEntry>, MirrorError> {
        let pages = self
            .bucket
            .list(prefix.to_string(), Some("/".to_string()))
            .await?;

        let mut entries = Vec::new();
        for page in pages {
            for common in page.common_prefixes.unwrap_or_default() {
                entries.push(ListEntry::Prefix(common.prefix));
            }
            for object in page.contents {
                // directory markers created by other S3 tools
                if object.key.ends_with('/') {
                    continue;
                }
                entries.push(ListEntry::Blob(object.key));
            }
        }
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(entries)
    }

    async fn download(&self, key: &str) -> Result<Blob, MirrorError> {
        let res = self.bucket.get_object(key).await?;
        check_status(key, res.status_code())?;
        let content_type = res
            .headers()
            .get("content-type")
            .cloned()
            .unwrap_or_default();
        Ok(Blob {
            content: res.bytes().to_vec(),
            content_type,
        })
    }

    async fn upload(&self, key: &str, content: &[u8], content_type: &str) -> Result<(), MirrorError> {
        let res = if content_type.is_empty() {
            self.bucket.put_object(key, content).await?
        } else {
            self.bucket
                .put_object_with_content_type(key, content, content_type)
                .await?
        };
        check_status(key, res.status_code())
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{Blob, BlobStore, ListEntry};
    use crate::errors::MirrorError;

    /// In memory store with switchable failures for tests
    #[derive(Default)]
    pub struct MemoryStore {
        blobs: Mutex<BTreeMap<String, Blob>>,
        fail_listing: bool,
        fail_downloads: bool,
        reject_uploads_containing: Option<String>,
    }

    impl MemoryStore {
        /// Every listing fails
        pub fn failing_listing() -> Self {
            MemoryStore {
                fail_listing: true,
                ..Default::default()
            }
        }

        /// Every download fails
        pub fn failing_downloads() -> Self {
            MemoryStore {
                fail_downloads: true,
                ..Default::default()
            }
        }

        /// Uploads to keys containing `marker` fail
        pub fn rejecting_uploads(marker: &str) -> Self {
            MemoryStore {
                reject_uploads_containing: Some(marker.to_string()),
                ..Default::default()
            }
        }

        pub fn insert(&self, key: &str, content: &[u8], content_type: &str) {
            self.blobs.lock().unwrap().insert(
                key.to_string(),
                Blob {
                    content: content.to_vec(),
                    content_type: content_type.to_string(),
                },
            );
        }

        pub fn get(&self, key: &str) -> Option<Blob> {
            self.blobs.lock().unwrap().get(key).cloned()
        }

        pub fn keys(&self) -> Vec<String> {
            self.blobs.lock().unwrap().keys().cloned().collect()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryStore {
        async fn list_by_hierarchy(&self, prefix: &str) -> Result<Vec<ListEntry>, MirrorError> {
            if self.fail_listing {
                return Err(MirrorError::Storage(format!("listing of {prefix} refused")));
            }
            let blobs = self.blobs.lock().unwrap();
            let mut prefixes = BTreeSet::new();
            let mut entries = Vec::new();
            for key in blobs.keys().filter(|k| k.starts_with(prefix)) {
                let rest = &key[prefix.len()..];
                match rest.find('/') {
                    Some(idx) => {
                        prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
                    }
                    None => entries.push(ListEntry::Blob(key.clone())),
                }
            }
            entries.extend(prefixes.into_iter().map(ListEntry::Prefix));
            entries.sort_by(|a, b| a.key().cmp(b.key()));
            Ok(entries)
        }

        async fn download(&self, key: &str) -> Result<Blob, MirrorError> {
            if self.fail_downloads {
                return Err(MirrorError::Storage(format!("download of {key} refused")));
            }
            self.get(key)
                .ok_or_else(|| MirrorError::Storage(format!("{key} does not exist")))
        }

        async fn upload(&self, key: &str, content: &[u8], content_type: &str) -> Result<(), MirrorError> {
            if let Some(marker) = &self.reject_uploads_containing {
                if key.contains(marker.as_str()) {
                    return Err(MirrorError::Storage(format!("upload of {key} refused")));
                }
            }
            self.insert(key, content, content_type);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_memory_store_listing() {
        let store = MemoryStore::default();
        store.insert("proj/README.md", b"# hi", "text/markdown");
        store.insert("proj/src/main.txt", b"x", "");
        store.insert("proj/src/lib.txt", b"y", "");
        store.insert("other.txt", b"o", "");

        let root = store.list_by_hierarchy("").await.unwrap();
        assert_eq!(
            root,
            vec![
                ListEntry::Blob("other.txt".to_string()),
                ListEntry::Prefix("proj/".to_string()),
            ]
        );

        let proj = store.list_by_hierarchy("proj/").await.unwrap();
        assert_eq!(
            proj,
            vec![
                ListEntry::Blob("proj/README.md".to_string()),
                ListEntry::Prefix("proj/src/".to_string()),
            ]
        );
    }
}
