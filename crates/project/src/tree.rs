use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProjectError;
use crate::DEFAULT_BUILD_DIR;

/// A file or directory inside a project.
/// 專案中的檔案或資料夾節點。
///
/// Files carry `children == None`; directories, including empty ones, carry
/// `Some`. Every `path` is absolute and lies under the canonical project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
}

impl FileNode {
    /// Finds a node by its project-relative path.
    /// 依專案相對路徑尋找節點。
    pub fn find(&self, relative: &Path) -> Option<&FileNode> {
        if self.relative_path == relative {
            return Some(self);
        }
        self.children
            .iter()
            .flatten()
            .filter(|child| relative.starts_with(&child.relative_path))
            .find_map(|child| child.find(relative))
    }

    /// Collects the relative paths of every file below this node, depth first.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        collect_files(self, &mut out);
        out
    }
}

fn collect_files(node: &FileNode, out: &mut Vec<PathBuf>) {
    match &node.children {
        None => out.push(node.relative_path.clone()),
        Some(children) => children.iter().for_each(|child| collect_files(child, out)),
    }
}

/// Options controlling which entries a tree walk skips.
/// 控制走訪檔案樹時略過哪些項目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOptions {
    /// Name of the build-artifact directory directly under the root.
    pub build_dir_name: String,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            build_dir_name: DEFAULT_BUILD_DIR.to_string(),
        }
    }
}

/// Builds the tree for `root` with default options.
pub fn build_tree(root: impl AsRef<Path>) -> Result<FileNode, ProjectError> {
    build_tree_with(root, &TreeOptions::default())
}

/// Recursively walks `root` into a [`FileNode`] tree.
/// 遞迴走訪根目錄並建立 [`FileNode`] 樹。
///
/// Hidden entries, the build directory and symlinks resolving outside the root
/// are skipped. Children that cannot be read are logged and skipped; only an
/// unreadable root fails the call.
pub fn build_tree_with(
    root: impl AsRef<Path>,
    options: &TreeOptions,
) -> Result<FileNode, ProjectError> {
    let requested = root.as_ref();
    let root = fs::canonicalize(requested).map_err(|err| ProjectError::io(requested, err))?;
    if !root.is_dir() {
        return Err(ProjectError::NotADirectory(requested.to_path_buf()));
    }

    let mut visited = HashSet::new();
    visited.insert(root.clone());
    let children = walk_dir(&root, &root, options, &mut visited)
        .map_err(|err| ProjectError::io(&root, err))?;

    let name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileNode {
        name,
        path: root,
        relative_path: PathBuf::new(),
        is_directory: true,
        children: Some(children),
    })
}

fn walk_dir(
    dir: &Path,
    root: &Path,
    options: &TreeOptions,
    visited: &mut HashSet<PathBuf>,
) -> std::io::Result<Vec<FileNode>> {
    let mut nodes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if dir == root && name == options.build_dir_name {
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping entry with unknown type");
                continue;
            }
        };
        let is_directory = if file_type.is_symlink() {
            match fs::canonicalize(&path) {
                Ok(target) if target.starts_with(root) => target.is_dir(),
                Ok(target) => {
                    debug!(link = %path.display(), target = %target.display(), "symlink leaves project root");
                    continue;
                }
                Err(_) => continue,
            }
        } else {
            file_type.is_dir()
        };

        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let children = if is_directory {
            let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if !visited.insert(canonical) {
                continue;
            }
            match walk_dir(&path, root, options, visited) {
                Ok(children) => Some(children),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable directory");
                    continue;
                }
            }
        } else {
            None
        };

        nodes.push(FileNode {
            name,
            path,
            relative_path,
            is_directory,
            children,
        });
    }

    nodes.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    });
    Ok(nodes)
}
