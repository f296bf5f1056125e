/// In memory file or directory moved between local disk and the blob store.
/// The variant is the node kind. Parent owns its children, a tree is built
/// per request and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    File {
        name: String,
        content: Vec<u8>,
        /// Empty string means unspecified
        content_type: String,
    },
    Directory {
        name: String,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    pub fn file(name: impl Into<String>, content: impl Into<Vec<u8>>) -> TreeNode {
        TreeNode::File {
            name: name.into(),
            content: content.into(),
            content_type: String::new(),
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<TreeNode>) -> TreeNode {
        TreeNode::Directory {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Directory { name, .. } => name,
        }
    }

    /// Number of file nodes in this subtree
    pub fn file_count(&self) -> usize {
        match self {
            TreeNode::File { .. } => 1,
            TreeNode::Directory { children, .. } => children.iter().map(TreeNode::file_count).sum(),
        }
    }
}

pub fn has_trailing_slash(path: &str) -> bool {
    path.ends_with('/')
}

/// Replaces every run of `/` with a single one
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

/// Joins two path segments with a single separator between them
pub fn join_path(base: &str, name: &str) -> String {
    collapse_slashes(&format!("{base}/{name}"))
}

/// Blob keys never start with a separator
pub fn blob_key(prefix: &str, name: &str) -> String {
    join_path(prefix, name).trim_start_matches('/').to_string()
}

/// Prefix a directory's children are stored under, always `/` terminated
pub fn child_prefix(prefix: &str, name: &str) -> String {
    format!("{}/", blob_key(prefix, name).trim_end_matches('/'))
}

/// Last non-empty `/` separated segment, so `a/b/` gives `b`
pub fn last_segment(path: &str) -> &str {
    path.split('/').filter(|s| !s.is_empty()).last().unwrap_or("")
}

/// Everything before the last segment, empty for top level keys
pub fn parent_prefix(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// Sorts by name at every level, filesystem listing order is not stable
#[cfg(test)]
pub fn sort_nodes(nodes: &mut [TreeNode]) {
    nodes.sort_by(|a, b| a.name().cmp(b.name()));
    for node in nodes.iter_mut() {
        if let TreeNode::Directory { children, .. } = node {
            sort_nodes(children);
        }
    }
}

#[test]
fn test_collapse_slashes() {
    assert_eq!(collapse_slashes("proj//README.md"), "proj/README.md");
    assert_eq!(collapse_slashes("a///b////"), "a/b/");
    assert_eq!(collapse_slashes("plain"), "plain");
}

#[test]
fn test_blob_key() {
    assert_eq!(blob_key("proj/", "README.md"), "proj/README.md");
    assert_eq!(blob_key("proj", "README.md"), "proj/README.md");
    assert_eq!(blob_key("", "README.md"), "README.md");
    assert_eq!(child_prefix("proj/", "src"), "proj/src/");
    assert_eq!(child_prefix("", "src"), "src/");
}

#[test]
fn test_last_segment_and_parent() {
    assert_eq!(last_segment("a/b/"), "b");
    assert_eq!(last_segment("a/b/c.txt"), "c.txt");
    assert_eq!(last_segment(""), "");
    assert_eq!(parent_prefix("a/b/c.txt"), "a/b");
    assert_eq!(parent_prefix("c.txt"), "");
    assert_eq!(parent_prefix("a/b/"), "a");
}

#[test]
fn test_node_accessors() {
    let mut tree = vec![TreeNode::directory(
        "proj",
        vec![
            TreeNode::file("z.txt", "z"),
            TreeNode::directory(
                "src",
                vec![TreeNode::file("main.txt", "x"), TreeNode::file("lib.txt", "y")],
            ),
            TreeNode::file("README.md", "# hi"),
        ],
    )];
    assert_eq!(tree[0].file_count(), 4);

    sort_nodes(&mut tree);
    match &tree[0] {
        TreeNode::Directory { children, .. } => {
            let names = children.iter().map(TreeNode::name).collect::<Vec<_>>();
            assert_eq!(names, vec!["README.md", "src", "z.txt"]);
            match &children[1] {
                TreeNode::Directory { children, .. } => {
                    assert_eq!(children[0].name(), "lib.txt");
                }
                TreeNode::File { .. } => panic!("expected directory"),
            }
        }
        TreeNode::File { .. } => panic!("expected directory"),
    }
}
