//! The typesetting engine seam.
//! （排版引擎介面。）
//!
//! The engine is opaque: it receives a read-only view of the project and hands
//! back the produced PDF bytes or its diagnostics.

mod process;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::CompileError;
use crate::resolver::{ScratchTree, SourceRead, VirtualSource};

pub use process::{ProcessEngine, INPUT_PLACEHOLDER, OUTDIR_PLACEHOLDER};

/// Converts a project view into PDF bytes.
/// 將專案內容轉換為 PDF 位元組。
///
/// `compile` is called from the blocking pool and may take seconds.
pub trait Engine: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn compile(&self, job: &EngineJob<'_>) -> Result<Vec<u8>, EngineFailure>;
}

/// Failure reported by an [`Engine`].
#[derive(Debug, Error)]
pub enum EngineFailure {
    /// Compiler output, kept verbatim.
    #[error("{0}")]
    Diagnostics(String),
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("failed to start {program}: {message}")]
    Launch { program: String, message: String },
    /// A read through the source view was rejected.
    #[error(transparent)]
    Source(#[from] CompileError),
}

/// What an engine gets to see of one compile.
#[derive(Debug, Clone, Copy)]
pub struct EngineJob<'a> {
    source: &'a VirtualSource,
}

impl<'a> EngineJob<'a> {
    pub fn new(source: &'a VirtualSource) -> Self {
        Self { source }
    }

    pub fn project_root(&self) -> &Path {
        self.source.root()
    }

    /// Root-relative path of the document to typeset.
    pub fn target(&self) -> &Path {
        self.source.target()
    }

    /// Reads a logical project path, overlay included.
    pub fn read(&self, logical: &Path) -> Result<Vec<u8>, CompileError> {
        self.source.read(logical)
    }

    pub fn read_to_string(&self, logical: &Path) -> Result<String, CompileError> {
        self.source.read_to_string(logical)
    }

    /// Whether a logical path is present in the project view.
    pub fn exists(&self, logical: &Path) -> Result<bool, CompileError> {
        self.source.exists(logical)
    }

    /// Writes the view to a private directory; removed when the guard drops.
    pub fn materialize(&self) -> Result<ScratchTree, CompileError> {
        self.source.materialize()
    }
}
