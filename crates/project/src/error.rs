use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sandbox::SandboxError;

/// Errors raised by project-level operations (tree, files, metadata).  
/// 專案層級操作（檔案樹、檔案、中繼資料）的錯誤類型。
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("{0} already contains files")]
    NotEmpty(PathBuf),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("failed to serialize project metadata: {0}")]
    Serialize(String),
}

impl ProjectError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ProjectError::Io {
            path: path.into(),
            source,
        }
    }
}
