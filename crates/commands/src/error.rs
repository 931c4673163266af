use std::io;

use incipit_compile::{CompileError, ErrorKind};
use incipit_project::{ProjectError, SandboxError};
use incipit_settings::SettingsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured failure returned to the UI layer.
/// 回傳給介面層的結構化錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<CompileError> for CommandError {
    fn from(err: CompileError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<SandboxError> for CommandError {
    fn from(err: SandboxError) -> Self {
        let kind = match err {
            SandboxError::Escape { .. } => ErrorKind::Security,
            SandboxError::Missing { .. } => ErrorKind::MissingDependency,
            SandboxError::Io { .. } => ErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ProjectError> for CommandError {
    fn from(err: ProjectError) -> Self {
        let kind = match &err {
            ProjectError::Sandbox(SandboxError::Escape { .. }) => ErrorKind::Security,
            ProjectError::Sandbox(SandboxError::Missing { .. }) => ErrorKind::MissingDependency,
            ProjectError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                ErrorKind::MissingDependency
            }
            _ => ErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<SettingsError> for CommandError {
    fn from(err: SettingsError) -> Self {
        let kind = match err {
            SettingsError::Parse { .. } => ErrorKind::MalformedMetadata,
            SettingsError::Read { .. }
            | SettingsError::Serialize { .. }
            | SettingsError::Write { .. } => ErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}
