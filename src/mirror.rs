use std::sync::Arc;

use crate::config::AccessTokens;
use crate::errors::MirrorError;
use crate::local_tree::{read_local_tree, write_local_tree, Skipped};
use crate::remote_tree::RemoteTree;
use crate::server_metrics;
use crate::store::BlobStore;
use crate::tree::{collapse_slashes, join_path, last_segment, parent_prefix, TreeNode};

/// Outcome of a finished sync, `skipped` lists local entries that were left
/// out with paths relative to the local root
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub files: usize,
    pub skipped: Vec<Skipped>,
}

/// Pairs the local directory with the bucket. Every operation checks the
/// token first and builds a fresh tree, nothing is kept between calls.
pub struct Mirror {
    store: Arc<dyn BlobStore>,
    local_root: String,
    tokens: AccessTokens,
    parallelism: usize,
}

impl Mirror {
    pub fn new(
        store: Arc<dyn BlobStore>,
        local_root: impl Into<String>,
        tokens: AccessTokens,
        parallelism: usize,
    ) -> Self {
        Mirror {
            store,
            local_root: local_root.into(),
            tokens,
            parallelism,
        }
    }

    fn remote(&self) -> RemoteTree<'_> {
        RemoteTree::new(self.store.as_ref(), self.parallelism)
    }

    /// Path under the local root, trailing `/` is kept since it changes how
    /// the path is read and written.
    pub fn resolve_local(&self, relative: &str) -> Result<String, MirrorError> {
        if relative.split('/').any(|segment| segment == "..") {
            return Err(MirrorError::PathEscapesRoot);
        }
        Ok(join_path(&self.local_root, relative))
    }

    fn relative_to_root(&self, skipped: Vec<Skipped>) -> Vec<Skipped> {
        let root = collapse_slashes(&self.local_root);
        let root = root.trim_end_matches('/');
        skipped
            .into_iter()
            .map(|entry| Skipped {
                path: entry
                    .path
                    .strip_prefix(root)
                    .unwrap_or(&entry.path)
                    .trim_start_matches('/')
                    .to_string(),
                reason: entry.reason,
            })
            .collect()
    }

    /// Content of the single file at `path`
    pub async fn fetch_file(&self, path: &str, token: &str) -> Result<String, MirrorError> {
        if !self.tokens.can_read(token) {
            return Err(MirrorError::InvalidToken);
        }

        let path = normalize_key(path);
        let name = last_segment(&path);
        // listing by prefix also returns siblings sharing the name as prefix
        let node = self
            .remote()
            .fetch_shallow(&path)
            .await?
            .into_iter()
            .find(|node| node.name() == name)
            .ok_or(MirrorError::PathNotFound)?;

        match node {
            TreeNode::Directory { .. } => Err(MirrorError::IsDirectory),
            TreeNode::File { content, .. } => Ok(String::from_utf8_lossy(&content).into_owned()),
        }
    }

    /// Stores `code` at key `path`
    pub async fn upload_file(&self, path: &str, code: &str, token: &str) -> Result<(), MirrorError> {
        if !self.tokens.can_write(token) {
            return Err(MirrorError::InvalidToken);
        }

        let path = normalize_key(path);
        let name = last_segment(&path);
        if name.is_empty() {
            return Err(MirrorError::PathNotFound);
        }

        let nodes = vec![TreeNode::file(name, code.as_bytes())];
        if self.remote().upload(&nodes, parent_prefix(&path)).await {
            server_metrics::MIRROR_BLOBS_UPLOADED.inc();
            Ok(())
        } else {
            Err(MirrorError::FileUploadFailed)
        }
    }

    /// Copies everything under the bucket prefix `source` into the local
    /// `destination`
    pub async fn sync_remote_to_local(
        &self,
        source: &str,
        destination: &str,
        token: &str,
    ) -> Result<SyncSummary, MirrorError> {
        if !self.tokens.can_write(token) {
            return Err(MirrorError::InvalidToken);
        }

        let destination = self.resolve_local(destination)?;
        let nodes = self.remote().fetch_deep(source).await?;
        let downloaded = nodes.iter().map(TreeNode::file_count).sum::<usize>();
        server_metrics::MIRROR_BLOBS_DOWNLOADED.inc_by(downloaded as u64);

        let report = write_local_tree(&nodes, &destination).await;
        server_metrics::MIRROR_LOCAL_FILES_WRITTEN.inc_by(report.files_written as u64);
        log::info!(
            "Synced {} files from {:?} to {}, {} skipped",
            report.files_written,
            source,
            destination,
            report.skipped.len()
        );

        Ok(SyncSummary {
            files: report.files_written,
            skipped: self.relative_to_root(report.skipped),
        })
    }

    /// Copies the local `source` into the bucket under `destination`
    pub async fn sync_local_to_remote(
        &self,
        source: &str,
        destination: &str,
        token: &str,
    ) -> Result<SyncSummary, MirrorError> {
        if !self.tokens.can_write(token) {
            return Err(MirrorError::InvalidToken);
        }

        let source = self.resolve_local(source)?;
        let read = read_local_tree(&source).await?;
        let files = read.nodes.iter().map(TreeNode::file_count).sum::<usize>();

        if !self.remote().upload(&read.nodes, destination).await {
            return Err(MirrorError::UploadFailed);
        }
        server_metrics::MIRROR_BLOBS_UPLOADED.inc_by(files as u64);
        log::info!(
            "Synced {} files from {} to {:?}, {} skipped",
            files,
            source,
            destination,
            read.skipped.len()
        );

        Ok(SyncSummary {
            files,
            skipped: self.relative_to_root(read.skipped),
        })
    }
}

/// Keys have no leading, trailing or repeated separators
fn normalize_key(path: &str) -> String {
    collapse_slashes(path).trim_matches('/').to_string()
}

#[cfg(test)]
use crate::store::memory::MemoryStore;

#[cfg(test)]
fn test_mirror(dir: &tempfile::TempDir) -> (Arc<MemoryStore>, Mirror) {
    let store = Arc::new(MemoryStore::default());
    let mirror = Mirror::new(
        store.clone(),
        dir.path().to_str().unwrap(),
        AccessTokens::new("read-secret", "write-secret"),
        4,
    );
    (store, mirror)
}

#[tokio::test]
async fn test_invalid_token_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);
    store.insert("a.txt", b"a", "");

    let res = mirror.fetch_file("a.txt", "nope").await;
    assert_eq!(res.unwrap_err().to_string(), "Invalid token.");
    // read token is not enough for anything that writes
    let res = mirror.upload_file("b.txt", "b", "read-secret").await;
    assert_eq!(res.unwrap_err().to_string(), "Invalid token.");
    let res = mirror.sync_remote_to_local("", "out/", "read-secret").await;
    assert!(matches!(res, Err(MirrorError::InvalidToken)));
    let res = mirror.sync_local_to_remote("", "backup/", "").await;
    assert!(matches!(res, Err(MirrorError::InvalidToken)));

    assert_eq!(store.keys(), vec!["a.txt"]);
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_fetch_file() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);
    store.insert("proj/README.md", b"# hi", "text/markdown");
    store.insert("proj/README.md.bak", b"old", "");
    store.insert("proj/src/main.txt", b"x", "");

    assert_eq!(mirror.fetch_file("proj/README.md", "read-secret").await.unwrap(), "# hi");
    assert_eq!(mirror.fetch_file("proj/src/main.txt/", "write-secret").await.unwrap(), "x");

    let res = mirror.fetch_file("proj/src", "read-secret").await;
    assert_eq!(res.unwrap_err().to_string(), "This path is a directory.");
    let res = mirror.fetch_file("proj/READ", "read-secret").await;
    assert_eq!(res.unwrap_err().to_string(), "Path not found");
    let res = mirror.fetch_file("missing.txt", "read-secret").await;
    assert_eq!(res.unwrap_err().to_string(), "Path not found");
}

#[tokio::test]
async fn test_upload_file() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);

    mirror
        .upload_file("proj/src/main.txt", "fn main() {}", "write-secret")
        .await
        .unwrap();
    mirror.upload_file("top.txt/", "top", "write-secret").await.unwrap();

    assert_eq!(store.keys(), vec!["proj/src/main.txt", "top.txt"]);
    assert_eq!(store.get("proj/src/main.txt").unwrap().content, b"fn main() {}");
    assert_eq!(
        mirror.fetch_file("proj/src/main.txt", "read-secret").await.unwrap(),
        "fn main() {}"
    );
}

#[tokio::test]
async fn test_upload_file_failure() {
    let store = Arc::new(MemoryStore::rejecting_uploads("locked"));
    let mirror = Mirror::new(store, "/unused", AccessTokens::new("r", "w"), 1);

    let res = mirror.upload_file("locked/a.txt", "a", "w").await;
    assert_eq!(res.unwrap_err().to_string(), "Upload NOT successful");
}

#[tokio::test]
async fn test_sync_local_to_remote_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("proj/locked")).unwrap();
    std::fs::write(dir.path().join("proj/locked/a.txt"), "a").unwrap();
    let store = Arc::new(MemoryStore::rejecting_uploads("locked"));
    let mirror = Mirror::new(store, dir.path().to_str().unwrap(), AccessTokens::new("r", "w"), 1);

    let res = mirror.sync_local_to_remote("proj/", "proj/", "w").await;
    assert_eq!(res.unwrap_err().to_string(), "Upload NOT successful.");
}

#[tokio::test]
async fn test_storage_errors_reach_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::failing_listing());
    store.insert("proj/README.md", b"# hi", "");
    let mirror = Mirror::new(store, dir.path().to_str().unwrap(), AccessTokens::new("r", "w"), 2);

    let res = mirror.fetch_file("proj/README.md", "r").await;
    assert_eq!(res.unwrap_err().to_string(), "listing of proj/README.md refused");
    let res = mirror.sync_remote_to_local("proj/", "out/", "w").await;
    assert_eq!(res.unwrap_err().to_string(), "listing of proj/ refused");
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_sync_local_to_remote_example() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);
    std::fs::create_dir_all(dir.path().join("proj/src")).unwrap();
    std::fs::write(dir.path().join("proj/README.md"), "# hi").unwrap();
    std::fs::write(dir.path().join("proj/src/main.txt"), "x").unwrap();

    let summary = mirror
        .sync_local_to_remote("proj/", "proj/", "write-secret")
        .await
        .unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(store.keys(), vec!["proj/README.md", "proj/src/main.txt"]);
    assert_eq!(store.get("proj/README.md").unwrap().content, b"# hi");
    assert_eq!(store.get("proj/src/main.txt").unwrap().content, b"x");

    // without the trailing slash the directory itself is mirrored
    mirror
        .sync_local_to_remote("proj", "backup", "write-secret")
        .await
        .unwrap();
    assert!(store.get("backup/proj/src/main.txt").is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_sync_reports_skipped_relative_to_root() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);
    std::fs::create_dir_all(dir.path().join("proj")).unwrap();
    std::fs::write(dir.path().join("proj/README.md"), "# hi").unwrap();
    std::os::unix::fs::symlink(
        dir.path().join("does-not-exist"),
        dir.path().join("proj/dangling"),
    )
    .unwrap();

    let summary = mirror
        .sync_local_to_remote("proj/", "proj/", "write-secret")
        .await
        .unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].path, "proj/dangling");
    assert_eq!(store.keys(), vec!["proj/README.md"]);
}

#[tokio::test]
async fn test_sync_local_to_remote_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);

    let res = mirror
        .sync_local_to_remote("not-there/", "proj/", "write-secret")
        .await;
    assert!(matches!(res, Err(MirrorError::Io { .. })));
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn test_sync_remote_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mirror) = test_mirror(&dir);
    store.insert("proj/README.md", b"# hi", "");
    store.insert("proj/src/main.txt", b"x", "");

    let summary = mirror
        .sync_remote_to_local("proj/", "checkout/", "write-secret")
        .await
        .unwrap();
    assert_eq!(summary.files, 2);
    assert!(summary.skipped.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("checkout/README.md")).unwrap(),
        "# hi"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("checkout/src/main.txt")).unwrap(),
        "x"
    );

    mirror
        .sync_remote_to_local("proj", "wrapped/", "write-secret")
        .await
        .unwrap();
    assert!(dir.path().join("wrapped/proj/src/main.txt").exists());
}

#[tokio::test]
async fn test_round_trip_local_remote_local() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, mirror) = test_mirror(&dir);
    std::fs::create_dir_all(dir.path().join("orig/a/b")).unwrap();
    std::fs::write(dir.path().join("orig/top.bin"), [0u8, 1, 2, 255]).unwrap();
    std::fs::write(dir.path().join("orig/a/one.txt"), "one").unwrap();
    std::fs::write(dir.path().join("orig/a/b/two.txt"), "two").unwrap();

    mirror
        .sync_local_to_remote("orig/", "snapshot/", "write-secret")
        .await
        .unwrap();
    mirror
        .sync_remote_to_local("snapshot/", "restored/", "write-secret")
        .await
        .unwrap();

    let mut original = read_local_tree(&mirror.resolve_local("orig/").unwrap())
        .await
        .unwrap()
        .nodes;
    let mut restored = read_local_tree(&mirror.resolve_local("restored/").unwrap())
        .await
        .unwrap()
        .nodes;
    crate::tree::sort_nodes(&mut original);
    crate::tree::sort_nodes(&mut restored);
    assert_eq!(original, restored);
}

#[tokio::test]
async fn test_local_paths_stay_inside_root() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, mirror) = test_mirror(&dir);

    let res = mirror
        .sync_remote_to_local("proj/", "../outside/", "write-secret")
        .await;
    assert_eq!(
        res.unwrap_err().to_string(),
        "Path escapes the local directory."
    );
    let res = mirror
        .sync_local_to_remote("a/../../etc", "x/", "write-secret")
        .await;
    assert!(matches!(res, Err(MirrorError::PathEscapesRoot)));
}
