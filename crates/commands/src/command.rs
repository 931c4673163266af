use std::path::PathBuf;

use incipit_compile::BuildArtifact;
use incipit_project::{FileNode, ProjectMeta};
use incipit_settings::GlobalSettings;
use serde::{Deserialize, Serialize};

/// Requests the UI layer can send to a [`crate::Session`].
/// 介面層可送出的指令。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Builds the file tree of an existing project and records it as recent.
    OpenProject { path: PathBuf },
    /// Writes a project skeleton into an empty directory.
    CreateNewProject { path: PathBuf },
    ReadFile {
        project_root: PathBuf,
        relative_path: PathBuf,
    },
    SaveFile {
        project_root: PathBuf,
        relative_path: PathBuf,
        content: String,
    },
    LoadProjectMeta { project_root: PathBuf },
    SaveProjectMeta {
        project_root: PathBuf,
        meta: ProjectMeta,
    },
    LoadGlobalSettings,
    SaveGlobalSettings { settings: GlobalSettings },
    CheckPdfExists {
        project_root: PathBuf,
        relative_path: PathBuf,
    },
    LoadPdf {
        project_root: PathBuf,
        relative_path: PathBuf,
    },
    /// Compiles `relative_path`. With `no_wait`, a target that is already
    /// compiling is reported as `Busy` instead of queueing a follow-up.
    CompileLatexProject {
        project_root: PathBuf,
        relative_path: PathBuf,
        #[serde(default)]
        unsaved_buffer: Option<String>,
        #[serde(default)]
        no_wait: bool,
    },
}

impl Command {
    /// Stable snake_case name, as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::OpenProject { .. } => "open_project",
            Command::CreateNewProject { .. } => "create_new_project",
            Command::ReadFile { .. } => "read_file",
            Command::SaveFile { .. } => "save_file",
            Command::LoadProjectMeta { .. } => "load_project_meta",
            Command::SaveProjectMeta { .. } => "save_project_meta",
            Command::LoadGlobalSettings => "load_global_settings",
            Command::SaveGlobalSettings { .. } => "save_global_settings",
            Command::CheckPdfExists { .. } => "check_pdf_exists",
            Command::LoadPdf { .. } => "load_pdf",
            Command::CompileLatexProject { .. } => "compile_latex_project",
        }
    }
}

/// Successful command results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Response {
    Tree(FileNode),
    Content(String),
    Ack,
    ProjectMeta(ProjectMeta),
    GlobalSettings(GlobalSettings),
    Exists(bool),
    Pdf(BuildArtifact),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: Command = serde_json::from_value(json!({
            "command": "compile_latex_project",
            "project_root": "/work/thesis",
            "relative_path": "main.tex"
        }))
        .unwrap();
        assert_eq!(
            command,
            Command::CompileLatexProject {
                project_root: PathBuf::from("/work/thesis"),
                relative_path: PathBuf::from("main.tex"),
                unsaved_buffer: None,
                no_wait: false,
            }
        );
        assert_eq!(command.name(), "compile_latex_project");

        let command: Command =
            serde_json::from_value(json!({ "command": "load_global_settings" })).unwrap();
        assert_eq!(command, Command::LoadGlobalSettings);
    }

    #[test]
    fn responses_serialize_with_type_tag() {
        let value = serde_json::to_value(Response::Exists(true)).unwrap();
        assert_eq!(value, json!({ "type": "exists", "value": true }));
        let value = serde_json::to_value(Response::Ack).unwrap();
        assert_eq!(value, json!({ "type": "ack" }));
    }
}
