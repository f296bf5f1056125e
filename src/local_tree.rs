use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use tokio::fs;

use crate::errors::MirrorError;
use crate::tree::{collapse_slashes, has_trailing_slash, join_path, last_segment, TreeNode};

/// Local entry left out of a best-effort read or write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LocalRead {
    pub nodes: Vec<TreeNode>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Default)]
pub struct LocalWrite {
    pub files_written: usize,
    pub skipped: Vec<Skipped>,
}

fn not_file_or_directory() -> Error {
    Error::new(ErrorKind::Other, "not a regular file or directory")
}

/// Reads `path` into tree nodes.
///
/// A directory path ending with `/` yields the directory's children as a
/// bare sequence, otherwise the result is a single node named after the
/// last path segment. Failing to stat, read or list `path` itself is an
/// error. Anything below it that can't be read is logged, left out of the
/// tree and reported in [`LocalRead::skipped`].
pub async fn read_local_tree(path: &str) -> Result<LocalRead, MirrorError> {
    let io_error = |error| MirrorError::Io {
        path: PathBuf::from(path),
        error,
    };

    let metadata = fs::metadata(path).await.map_err(io_error)?;
    let mut read = LocalRead::default();
    if metadata.is_dir() {
        let children = read_children(path, &mut read.skipped)
            .await
            .map_err(io_error)?;
        if has_trailing_slash(path) {
            read.nodes = children;
        } else {
            read.nodes
                .push(TreeNode::directory(last_segment(path), children));
        }
    } else if metadata.is_file() {
        let content = fs::read(path).await.map_err(io_error)?;
        read.nodes.push(TreeNode::file(last_segment(path), content));
    } else {
        return Err(io_error(not_file_or_directory()));
    }

    Ok(read)
}

async fn read_children(dir: &str, skipped: &mut Vec<Skipped>) -> std::io::Result<Vec<TreeNode>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_path = join_path(dir, &name);
        if let Some(node) = read_node(child_path, skipped).await {
            children.push(node);
        }
    }
    Ok(children)
}

fn read_node(path: String, skipped: &mut Vec<Skipped>) -> BoxFuture<'_, Option<TreeNode>> {
    async move {
        match read_entry(&path, skipped).await {
            Ok(node) => Some(node),
            Err(e) => {
                log::warn!("Skipping unreadable local entry {path}: {e}");
                skipped.push(Skipped {
                    path,
                    reason: e.to_string(),
                });
                None
            }
        }
    }
    .boxed()
}

async fn read_entry(path: &str, skipped: &mut Vec<Skipped>) -> std::io::Result<TreeNode> {
    let metadata = fs::metadata(path).await?;
    if metadata.is_dir() {
        let children = read_children(path, skipped).await?;
        Ok(TreeNode::directory(last_segment(path), children))
    } else if metadata.is_file() {
        let content = fs::read(path).await?;
        Ok(TreeNode::file(last_segment(path), content))
    } else {
        Err(not_file_or_directory())
    }
}

/// Writes `nodes` under `destination`.
///
/// With a `/` terminated destination each file lands at `destination/name`,
/// otherwise a file node is written to `destination` itself. Directories
/// recurse into `destination/name/`. Missing parent directories are created.
/// Failed writes are logged and reported, the rest of the batch still runs.
pub async fn write_local_tree(nodes: &[TreeNode], destination: &str) -> LocalWrite {
    let mut report = LocalWrite::default();
    write_nodes(nodes, destination.to_string(), &mut report).await;
    report
}

fn write_nodes<'a>(
    nodes: &'a [TreeNode],
    destination: String,
    report: &'a mut LocalWrite,
) -> BoxFuture<'a, ()> {
    async move {
        for node in nodes {
            match node {
                TreeNode::File { name, content, .. } => {
                    let path = if has_trailing_slash(&destination) {
                        join_path(&destination, name)
                    } else {
                        collapse_slashes(&destination)
                    };
                    match write_file(&path, content).await {
                        Ok(()) => report.files_written += 1,
                        Err(e) => {
                            log::warn!("Failed writing local file {path}: {e}");
                            report.skipped.push(Skipped {
                                path,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                TreeNode::Directory { name, children } => {
                    let child_destination =
                        format!("{}/", join_path(&destination, name).trim_end_matches('/'));
                    write_nodes(children, child_destination, report).await;
                }
            }
        }
    }
    .boxed()
}

async fn write_file(path: &str, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(path, content).await
}

#[cfg(test)]
fn dir_str(dir: &tempfile::TempDir) -> String {
    dir.path().to_str().unwrap().to_string()
}

#[cfg(test)]
fn sample_project(root: &Path) {
    std::fs::create_dir_all(root.join("proj/src")).unwrap();
    std::fs::write(root.join("proj/README.md"), "# hi").unwrap();
    std::fs::write(root.join("proj/src/main.txt"), "x").unwrap();
}

#[tokio::test]
async fn test_read_directory_without_trailing_slash() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());

    let mut read = read_local_tree(&format!("{}/proj", dir_str(&dir)))
        .await
        .unwrap();
    crate::tree::sort_nodes(&mut read.nodes);
    assert!(read.skipped.is_empty());
    assert_eq!(
        read.nodes,
        vec![TreeNode::directory(
            "proj",
            vec![
                TreeNode::file("README.md", "# hi"),
                TreeNode::directory("src", vec![TreeNode::file("main.txt", "x")]),
            ]
        )]
    );
}

#[tokio::test]
async fn test_read_directory_with_trailing_slash() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());

    let mut read = read_local_tree(&format!("{}/proj/", dir_str(&dir)))
        .await
        .unwrap();
    crate::tree::sort_nodes(&mut read.nodes);
    assert_eq!(
        read.nodes,
        vec![
            TreeNode::file("README.md", "# hi"),
            TreeNode::directory("src", vec![TreeNode::file("main.txt", "x")]),
        ]
    );
}

#[tokio::test]
async fn test_read_single_file() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());

    let read = read_local_tree(&format!("{}/proj/README.md", dir_str(&dir)))
        .await
        .unwrap();
    assert_eq!(read.nodes, vec![TreeNode::file("README.md", "# hi")]);
}

#[tokio::test]
async fn test_read_missing_root_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let res = read_local_tree(&format!("{}/nothing-here", dir_str(&dir))).await;
    assert!(matches!(res, Err(MirrorError::Io { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_skips_broken_entries() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());
    // dangling symlink fails the stat below the root
    std::os::unix::fs::symlink(
        dir.path().join("does-not-exist"),
        dir.path().join("proj/dangling"),
    )
    .unwrap();

    let mut read = read_local_tree(&format!("{}/proj/", dir_str(&dir)))
        .await
        .unwrap();
    crate::tree::sort_nodes(&mut read.nodes);
    assert_eq!(read.nodes.len(), 2);
    assert_eq!(read.skipped.len(), 1);
    assert!(read.skipped[0].path.ends_with("proj/dangling"));
}

#[tokio::test]
async fn test_write_tree_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = vec![
        TreeNode::file("README.md", "# hi"),
        TreeNode::directory(
            "src",
            vec![TreeNode::directory("deep", vec![TreeNode::file("main.txt", "x")])],
        ),
    ];

    let report = write_local_tree(&nodes, &format!("{}/out/", dir_str(&dir))).await;
    assert_eq!(report.files_written, 2);
    assert!(report.skipped.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/README.md")).unwrap(),
        "# hi"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/src/deep/main.txt")).unwrap(),
        "x"
    );
}

#[tokio::test]
async fn test_write_single_file_to_exact_path() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = vec![TreeNode::file("ignored-name.txt", "content")];

    let report = write_local_tree(&nodes, &format!("{}/a/b/renamed.txt", dir_str(&dir))).await;
    assert_eq!(report.files_written, 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a/b/renamed.txt")).unwrap(),
        "content"
    );
    assert!(!dir.path().join("a/b/renamed.txt/ignored-name.txt").exists());
}

#[tokio::test]
async fn test_write_continues_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    // a plain file where a directory is needed
    std::fs::write(dir.path().join("blocker"), "").unwrap();
    let nodes = vec![
        TreeNode::directory("blocker", vec![TreeNode::file("a.txt", "a")]),
        TreeNode::file("b.txt", "b"),
    ];

    let report = write_local_tree(&nodes, &format!("{}/", dir_str(&dir))).await;
    assert_eq!(report.files_written, 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("blocker/a.txt"));
    assert_eq!(std::fs::read_to_string(dir.path().join("b.txt")).unwrap(), "b");
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut nodes = vec![
        TreeNode::file("README.md", "# hi"),
        TreeNode::directory("src", vec![TreeNode::file("main.txt", vec![0u8, 159, 146, 150])]),
    ];
    write_local_tree(&nodes, &format!("{}/copy/", dir_str(&dir))).await;

    let mut read = read_local_tree(&format!("{}/copy/", dir_str(&dir)))
        .await
        .unwrap();
    crate::tree::sort_nodes(&mut read.nodes);
    crate::tree::sort_nodes(&mut nodes);
    assert_eq!(read.nodes, nodes);
}
