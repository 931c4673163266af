use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Errors raised while confining a path to the project root.
/// 將路徑限制在專案根目錄時可能發生的錯誤。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("{path} escapes the project root")]
    Escape { path: PathBuf },
    #[error("{path} does not exist")]
    Missing { path: PathBuf },
    #[error("cannot access {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl SandboxError {
    /// Logical path the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            SandboxError::Escape { path }
            | SandboxError::Missing { path }
            | SandboxError::Io { path, .. } => path,
        }
    }
}

/// A canonical project root that every project-relative path is resolved against.
/// 以正規化後的專案根目錄解析所有相對路徑。
///
/// Resolution is two-staged: the logical path is first normalised lexically
/// (so `a/../../x` is rejected even when nothing exists on disk), then the
/// joined path is canonicalised so symlinks leaving the root are caught too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSandbox {
    root: PathBuf,
}

impl ProjectSandbox {
    /// Canonicalises `root`; fails when it is missing or not a directory.
    /// 正規化根目錄；若不存在或不是資料夾則失敗。
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let requested = root.as_ref();
        let root = fs::canonicalize(requested).map_err(|err| io_error(requested, err))?;
        if !root.is_dir() {
            return Err(SandboxError::Io {
                path: requested.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }
        Ok(Self { root })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically normalises a logical path into a root-relative one.
    /// 以字面方式將邏輯路徑正規化為相對於根目錄的路徑。
    ///
    /// Absolute inputs are accepted only when they already point under the root.
    pub fn normalize(&self, logical: &Path) -> Result<PathBuf, SandboxError> {
        let relative = if logical.is_absolute() {
            logical
                .strip_prefix(&self.root)
                .map_err(|_| SandboxError::Escape {
                    path: logical.to_path_buf(),
                })?
        } else {
            logical
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(SandboxError::Escape {
                            path: logical.to_path_buf(),
                        });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::Escape {
                        path: logical.to_path_buf(),
                    });
                }
            }
        }
        Ok(normalized)
    }

    /// Resolves a path that must already exist, following symlinks.
    /// 解析必須已存在的路徑（會追蹤符號連結）。
    pub fn resolve_existing(&self, logical: &Path) -> Result<PathBuf, SandboxError> {
        let relative = self.normalize(logical)?;
        let joined = self.root.join(&relative);
        let canonical = fs::canonicalize(&joined).map_err(|err| io_error(logical, err))?;
        if !canonical.starts_with(&self.root) {
            return Err(SandboxError::Escape {
                path: logical.to_path_buf(),
            });
        }
        Ok(canonical)
    }

    /// Resolves a write destination that may not exist yet.
    /// 解析可能尚未存在的寫入目標。
    ///
    /// The nearest existing ancestor is canonicalised and checked; an existing
    /// destination is checked like [`ProjectSandbox::resolve_existing`].
    pub fn resolve_for_write(&self, logical: &Path) -> Result<PathBuf, SandboxError> {
        let relative = self.normalize(logical)?;
        if relative.as_os_str().is_empty() {
            return Err(SandboxError::Io {
                path: logical.to_path_buf(),
                message: "refusing to write to the project root".to_string(),
            });
        }
        let joined = self.root.join(&relative);
        if fs::symlink_metadata(&joined).is_ok() {
            return self.resolve_existing(logical);
        }

        let mut ancestor = joined.parent();
        while let Some(candidate) = ancestor {
            if fs::symlink_metadata(candidate).is_ok() {
                let canonical =
                    fs::canonicalize(candidate).map_err(|err| io_error(logical, err))?;
                if !canonical.starts_with(&self.root) {
                    return Err(SandboxError::Escape {
                        path: logical.to_path_buf(),
                    });
                }
                return Ok(joined);
            }
            ancestor = candidate.parent();
        }
        Err(SandboxError::Escape {
            path: logical.to_path_buf(),
        })
    }
}

fn io_error(path: &Path, err: std::io::Error) -> SandboxError {
    if err.kind() == ErrorKind::NotFound {
        SandboxError::Missing {
            path: path.to_path_buf(),
        }
    } else {
        SandboxError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}
