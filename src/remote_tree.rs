use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::Semaphore;

use crate::errors::MirrorError;
use crate::store::{BlobStore, ListEntry};
use crate::tree::{blob_key, child_prefix, last_segment, TreeNode};

/// Moves trees between memory and a blob store.
///
/// Blob transfers of a single walk share `parallelism` permits, so siblings
/// may download or upload concurrently while the whole walk stays bounded.
pub struct RemoteTree<'a> {
    store: &'a dyn BlobStore,
    parallelism: usize,
    permits: Semaphore,
}

impl<'a> RemoteTree<'a> {
    pub fn new(store: &'a dyn BlobStore, parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        RemoteTree {
            store,
            parallelism,
            permits: Semaphore::new(parallelism),
        }
    }

    /// Every entry under `prefix` with sub-prefixes resolved to full depth.
    /// Any listing or download failure fails the whole fetch.
    pub async fn fetch_deep(&self, prefix: &str) -> Result<Vec<TreeNode>, MirrorError> {
        self.fetch(prefix.to_string(), true).await
    }

    /// Same as [`RemoteTree::fetch_deep`] but sub-prefixes become empty
    /// directories, only one level is listed.
    pub async fn fetch_shallow(&self, prefix: &str) -> Result<Vec<TreeNode>, MirrorError> {
        self.fetch(prefix.to_string(), false).await
    }

    fn fetch(&self, prefix: String, deep: bool) -> BoxFuture<'_, Result<Vec<TreeNode>, MirrorError>> {
        async move {
            let entries = self.store.list_by_hierarchy(&prefix).await?;
            // buffered keeps listing order
            let nodes: Vec<TreeNode> = stream::iter(entries)
                .map(|entry| self.fetch_entry(entry, deep))
                .buffered(self.parallelism)
                .try_collect()
                .await?;
            Ok(nodes)
        }
        .boxed()
    }

    async fn fetch_entry(&self, entry: ListEntry, deep: bool) -> Result<TreeNode, MirrorError> {
        match entry {
            ListEntry::Prefix(prefix) => {
                let children = if deep {
                    self.fetch(prefix.clone(), true).await?
                } else {
                    Vec::new()
                };
                Ok(TreeNode::directory(last_segment(&prefix), children))
            }
            ListEntry::Blob(key) => {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| MirrorError::Storage(e.to_string()))?;
                let blob = self.store.download(&key).await?;
                log::debug!("Downloaded {} ({} bytes)", key, blob.content.len());
                Ok(TreeNode::File {
                    name: last_segment(&key).to_string(),
                    content: blob.content,
                    content_type: blob.content_type,
                })
            }
        }
    }

    /// Uploads `nodes` under `prefix`, files to `prefix/name` and directories
    /// recursively to `prefix/name/`. Returns true only when every single
    /// upload succeeded, failures are logged and the rest still run.
    pub async fn upload(&self, nodes: &[TreeNode], prefix: &str) -> bool {
        self.upload_nodes(nodes, prefix.to_string()).await
    }

    fn upload_nodes<'b>(&'b self, nodes: &'b [TreeNode], prefix: String) -> BoxFuture<'b, bool> {
        async move {
            let prefix = &prefix;
            let uploads: Vec<_> = nodes
                .iter()
                .map(|node| self.upload_node(node, prefix))
                .collect();
            stream::iter(uploads)
                .buffer_unordered(self.parallelism)
                .fold(true, |success, ok| async move { success && ok })
                .await
        }
        .boxed()
    }

    async fn upload_node(&self, node: &TreeNode, prefix: &str) -> bool {
        match node {
            TreeNode::File {
                name,
                content,
                content_type,
            } => {
                let key = blob_key(prefix, name);
                let _permit = match self.permits.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        log::error!("Can't upload {key}: {e}");
                        return false;
                    }
                };
                match self.store.upload(&key, content, content_type).await {
                    Ok(()) => {
                        log::debug!("Uploaded {} ({} bytes)", key, content.len());
                        true
                    }
                    Err(e) => {
                        log::error!("Upload of {key} failed: {e}");
                        false
                    }
                }
            }
            TreeNode::Directory { name, children } => {
                self.upload_nodes(children, child_prefix(prefix, name)).await
            }
        }
    }
}

#[cfg(test)]
use crate::store::memory::MemoryStore;

#[cfg(test)]
fn project_store() -> MemoryStore {
    let store = MemoryStore::default();
    store.insert("proj/README.md", b"# hi", "text/markdown");
    store.insert("proj/src/main.txt", b"x", "text/plain");
    store.insert("proj/src/nested/deep.txt", b"deep", "");
    store
}

#[tokio::test]
async fn test_fetch_deep() {
    let store = project_store();
    let remote = RemoteTree::new(&store, 4);

    let nodes = remote.fetch_deep("proj/").await.unwrap();
    assert_eq!(
        nodes,
        vec![
            TreeNode::File {
                name: "README.md".to_string(),
                content: b"# hi".to_vec(),
                content_type: "text/markdown".to_string(),
            },
            TreeNode::directory(
                "src",
                vec![
                    TreeNode::File {
                        name: "main.txt".to_string(),
                        content: b"x".to_vec(),
                        content_type: "text/plain".to_string(),
                    },
                    TreeNode::directory("nested", vec![TreeNode::file("deep.txt", "deep")]),
                ]
            ),
        ]
    );

    // without the slash the prefix itself shows up as one directory
    let wrapped = remote.fetch_deep("proj").await.unwrap();
    assert_eq!(wrapped.len(), 1);
    assert_eq!(wrapped[0].name(), "proj");
    assert_eq!(wrapped[0].file_count(), 3);
}

#[tokio::test]
async fn test_fetch_shallow() {
    let store = project_store();
    let remote = RemoteTree::new(&store, 1);

    let nodes = remote.fetch_shallow("proj/").await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].name(), "README.md");
    assert_eq!(nodes[1], TreeNode::directory("src", Vec::new()));
}

#[tokio::test]
async fn test_fetch_missing_prefix_is_empty() {
    let store = project_store();
    let remote = RemoteTree::new(&store, 2);
    assert!(remote.fetch_deep("nope/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_fails_fast_on_download_error() {
    let store = MemoryStore::failing_downloads();
    store.insert("proj/a.txt", b"a", "");
    let remote = RemoteTree::new(&store, 2);

    let res = remote.fetch_deep("proj/").await;
    assert!(matches!(res, Err(MirrorError::Storage(_))));
}

#[tokio::test]
async fn test_fetch_fails_fast_on_listing_error() {
    let store = MemoryStore::failing_listing();
    store.insert("proj/a.txt", b"a", "");
    let remote = RemoteTree::new(&store, 2);

    match remote.fetch_shallow("proj/").await {
        Err(MirrorError::Storage(message)) => assert_eq!(message, "listing of proj/ refused"),
        other => panic!("expected storage error, got {other:?}"),
    }
    assert!(remote.fetch_deep("proj/").await.is_err());
}

#[tokio::test]
async fn test_upload_example_project() {
    let store = MemoryStore::default();
    let remote = RemoteTree::new(&store, 3);
    let nodes = vec![
        TreeNode::file("README.md", "# hi"),
        TreeNode::directory("src", vec![TreeNode::file("main.txt", "x")]),
    ];

    assert!(remote.upload(&nodes, "proj/").await);
    assert_eq!(store.keys(), vec!["proj/README.md", "proj/src/main.txt"]);
    assert_eq!(store.get("proj/README.md").unwrap().content, b"# hi");
    assert_eq!(store.get("proj/src/main.txt").unwrap().content, b"x");

    // uploading again overwrites in place
    assert!(remote.upload(&nodes, "proj").await);
    assert_eq!(store.keys(), vec!["proj/README.md", "proj/src/main.txt"]);
}

#[tokio::test]
async fn test_upload_keeps_content_type() {
    let store = MemoryStore::default();
    let remote = RemoteTree::new(&store, 1);
    let nodes = vec![TreeNode::File {
        name: "index.html".to_string(),
        content: b"<p></p>".to_vec(),
        content_type: "text/html".to_string(),
    }];

    assert!(remote.upload(&nodes, "").await);
    assert_eq!(store.get("index.html").unwrap().content_type, "text/html");
}

#[tokio::test]
async fn test_upload_reports_any_failure() {
    let store = MemoryStore::rejecting_uploads("bad");
    let remote = RemoteTree::new(&store, 2);
    let nodes = vec![
        TreeNode::file("good.txt", "g"),
        TreeNode::directory("sub", vec![TreeNode::file("bad.txt", "b")]),
        TreeNode::file("also-good.txt", "g"),
    ];

    assert!(!remote.upload(&nodes, "p/").await);
    // the rest of the batch still went through
    assert_eq!(store.keys(), vec!["p/also-good.txt", "p/good.txt"]);
}

#[tokio::test]
async fn test_upload_then_fetch_round_trip() {
    let store = MemoryStore::default();
    let remote = RemoteTree::new(&store, 4);
    let mut nodes = vec![
        TreeNode::file("b.txt", "b"),
        TreeNode::directory(
            "a",
            vec![
                TreeNode::file("2.txt", "two"),
                TreeNode::directory("deeper", vec![TreeNode::file("1.txt", "one")]),
            ],
        ),
    ];

    assert!(remote.upload(&nodes, "copy/").await);
    let fetched = remote.fetch_deep("copy/").await.unwrap();
    crate::tree::sort_nodes(&mut nodes);
    assert_eq!(fetched, nodes);
}
