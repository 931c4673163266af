use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cache::BuildArtifact;
use crate::error::CompileError;

/// One compile attempt. Immutable once submitted.
/// 單次編譯請求；提交後不可變更。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub project_root: PathBuf,
    /// Project-relative path of the document to typeset.
    pub target_file: PathBuf,
    /// Editor content that replaces the on-disk target for this compile only.
    #[serde(default)]
    pub unsaved_buffer: Option<String>,
}

impl CompileRequest {
    pub fn new(project_root: impl Into<PathBuf>, target_file: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            target_file: target_file.into(),
            unsaved_buffer: None,
        }
    }

    pub fn with_buffer(mut self, buffer: impl Into<String>) -> Self {
        self.unsaved_buffer = Some(buffer.into());
        self
    }
}

/// Lifecycle of a compile for one target.
/// 單一目標的編譯狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompileStage {
    #[default]
    Idle,
    Resolving,
    Running,
    Succeeded,
    Failed,
}

/// Result of a compile request.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    Success(BuildArtifact),
    Failure(CompileError),
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success(_))
    }

    pub fn artifact(&self) -> Option<&BuildArtifact> {
        match self {
            CompileOutcome::Success(artifact) => Some(artifact),
            CompileOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CompileError> {
        match self {
            CompileOutcome::Success(_) => None,
            CompileOutcome::Failure(err) => Some(err),
        }
    }

    /// Terminal stage this outcome corresponds to.
    pub fn stage(&self) -> CompileStage {
        match self {
            CompileOutcome::Success(_) => CompileStage::Succeeded,
            CompileOutcome::Failure(_) => CompileStage::Failed,
        }
    }

    pub fn into_result(self) -> Result<BuildArtifact, CompileError> {
        match self {
            CompileOutcome::Success(artifact) => Ok(artifact),
            CompileOutcome::Failure(err) => Err(err),
        }
    }
}
