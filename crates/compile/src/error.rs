//! Error taxonomy shared by the resolver, the build cache and the orchestrator,
//! plus the pure translation functions that map raw failures into it.
//! （解析器、建置快取與協調器共用的錯誤分類，以及轉換函式。）

use std::io;
use std::path::{Path, PathBuf};

use incipit_project::SandboxError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineFailure;

/// Closed set of failure categories surfaced to the UI layer.
/// 回報給介面層的封閉錯誤分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Filesystem unreadable or unwritable; retry is user-initiated.
    Io,
    /// A path escapes the project root; never retried automatically.
    Security,
    /// A referenced file is absent.
    MissingDependency,
    /// Compiler diagnostics; an expected outcome, not a system fault.
    Engine,
    /// A compile for the same target is in flight; debounce and retry.
    Busy,
    /// A persisted record is corrupt; recovered locally with defaults.
    MalformedMetadata,
}

/// Failure of a compile request.
/// 編譯請求的失敗原因。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("{path} escapes the project root{}", requester_suffix(.requested_by))]
    Security {
        path: PathBuf,
        requested_by: Option<PathBuf>,
    },
    #[error("missing dependency {path}{}", requester_suffix(.requested_by))]
    MissingDependency {
        path: PathBuf,
        requested_by: Option<PathBuf>,
    },
    #[error("compilation failed:\n{diagnostics}")]
    Engine { diagnostics: String },
    #[error("a compile for {target} is already in flight")]
    Busy { target: PathBuf },
}

fn requester_suffix(requested_by: &Option<PathBuf>) -> String {
    match requested_by {
        Some(document) => format!(" (referenced from {})", document.display()),
        None => String::new(),
    }
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Io { .. } => ErrorKind::Io,
            CompileError::Security { .. } => ErrorKind::Security,
            CompileError::MissingDependency { .. } => ErrorKind::MissingDependency,
            CompileError::Engine { .. } => ErrorKind::Engine,
            CompileError::Busy { .. } => ErrorKind::Busy,
        }
    }

    /// Attributes a resolution failure to the document that referenced it.
    pub fn requested_by(self, document: &Path) -> Self {
        match self {
            CompileError::Security { path, .. } => CompileError::Security {
                path,
                requested_by: Some(document.to_path_buf()),
            },
            CompileError::MissingDependency { path, .. } => CompileError::MissingDependency {
                path,
                requested_by: Some(document.to_path_buf()),
            },
            other => other,
        }
    }

    pub(crate) fn io_message(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompileError::Io {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Maps a filesystem error on `path`.
pub fn from_io(path: &Path, err: &io::Error) -> CompileError {
    if err.kind() == io::ErrorKind::NotFound {
        CompileError::MissingDependency {
            path: path.to_path_buf(),
            requested_by: None,
        }
    } else {
        CompileError::io_message(path, err.to_string())
    }
}

/// Maps a sandbox rejection, attributing it to `requested_by` when known.
pub fn from_sandbox(err: SandboxError, requested_by: Option<&Path>) -> CompileError {
    let requested_by = requested_by.map(Path::to_path_buf);
    match err {
        SandboxError::Escape { path } => CompileError::Security { path, requested_by },
        SandboxError::Missing { path } => CompileError::MissingDependency { path, requested_by },
        SandboxError::Io { path, message } => CompileError::Io { path, message },
    }
}

/// Maps an engine failure; diagnostics are kept verbatim.
pub fn from_engine(failure: EngineFailure) -> CompileError {
    match failure {
        EngineFailure::Diagnostics(diagnostics) => CompileError::Engine { diagnostics },
        EngineFailure::Io { path, message } => CompileError::Io { path, message },
        EngineFailure::Launch { program, message } => CompileError::io_message(program, message),
        EngineFailure::Source(err) => err,
    }
}
