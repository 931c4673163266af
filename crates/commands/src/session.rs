//! The dispatcher behind the command table.
//! （指令表的分派器。）

use std::path::Path;
use std::sync::Arc;

use incipit_compile::{
    CompileError, CompileRequest, Engine, Orchestrator, OrchestratorConfig,
};
use incipit_project::{
    build_tree_with, create_skeleton, read_file, save_file, FileNode, ProjectMetaStore,
    ProjectSandbox, TreeOptions,
};
use incipit_settings::{AppConfig, GlobalSettings, GlobalSettingsStore};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::{Command, Response};
use crate::error::CommandError;

/// Owns the global settings store and the orchestrator.
/// 持有全域設定與編譯協調器。
pub struct Session {
    settings: Mutex<GlobalSettingsStore>,
    config: AppConfig,
    orchestrator: Orchestrator,
}

impl Session {
    pub fn new(settings: GlobalSettingsStore, config: AppConfig, engine: Arc<dyn Engine>) -> Self {
        let orchestrator = Orchestrator::new(
            engine,
            OrchestratorConfig {
                build_dir_name: config.build_dir_name.clone(),
                max_parallel: config.compile.max_parallel,
            },
        );
        Self {
            settings: Mutex::new(settings),
            config,
            orchestrator,
        }
    }

    /// Executes one command.
    /// 執行單一指令。
    pub async fn dispatch(&self, command: Command) -> Result<Response, CommandError> {
        debug!(command = command.name(), "dispatching command");
        match command {
            Command::OpenProject { path } => self.open_project(&path).map(Response::Tree),
            Command::CreateNewProject { path } => self.create_project(&path).map(Response::Tree),
            Command::ReadFile {
                project_root,
                relative_path,
            } => {
                let sandbox = ProjectSandbox::open(&project_root)?;
                Ok(Response::Content(read_file(&sandbox, &relative_path)?))
            }
            Command::SaveFile {
                project_root,
                relative_path,
                content,
            } => {
                let sandbox = ProjectSandbox::open(&project_root)?;
                save_file(&sandbox, &relative_path, &content)?;
                Ok(Response::Ack)
            }
            Command::LoadProjectMeta { project_root } => {
                let sandbox = ProjectSandbox::open(&project_root)?;
                Ok(Response::ProjectMeta(
                    ProjectMetaStore::for_project(sandbox.root()).load(),
                ))
            }
            Command::SaveProjectMeta { project_root, meta } => {
                let sandbox = ProjectSandbox::open(&project_root)?;
                ProjectMetaStore::for_project(sandbox.root()).save(&meta)?;
                Ok(Response::Ack)
            }
            Command::LoadGlobalSettings => Ok(Response::GlobalSettings(self.settings.lock().load())),
            Command::SaveGlobalSettings { settings } => {
                self.settings.lock().save(&settings)?;
                Ok(Response::Ack)
            }
            Command::CheckPdfExists {
                project_root,
                relative_path,
            } => {
                let found = self
                    .orchestrator
                    .cache()
                    .contains(&project_root, &relative_path)?;
                Ok(Response::Exists(found))
            }
            Command::LoadPdf {
                project_root,
                relative_path,
            } => {
                let cache = self.orchestrator.cache();
                match cache.lookup(&project_root, &relative_path)? {
                    Some(artifact) => Ok(Response::Pdf(artifact)),
                    None => Err(CompileError::MissingDependency {
                        path: cache.artifact_path(&project_root, &relative_path)?,
                        requested_by: None,
                    }
                    .into()),
                }
            }
            Command::CompileLatexProject {
                project_root,
                relative_path,
                unsaved_buffer,
                no_wait,
            } => {
                let request = CompileRequest {
                    project_root,
                    target_file: relative_path,
                    unsaved_buffer,
                };
                let ticket = if no_wait {
                    self.orchestrator.try_submit(request)?
                } else {
                    self.orchestrator.submit(request)
                };
                let artifact = ticket.await.into_result()?;
                Ok(Response::Pdf(artifact))
            }
        }
    }

    /// Applies `update` to the global settings under the store lock and saves.
    pub fn update_global_settings(
        &self,
        update: impl FnOnce(&mut GlobalSettings),
    ) -> Result<GlobalSettings, CommandError> {
        let store = self.settings.lock();
        let mut settings = store.load();
        update(&mut settings);
        store.save(&settings)?;
        Ok(settings)
    }

    fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            build_dir_name: self.config.build_dir_name.clone(),
        }
    }

    fn open_project(&self, path: &Path) -> Result<FileNode, CommandError> {
        let sandbox = ProjectSandbox::open(path)?;
        let tree = build_tree_with(sandbox.root(), &self.tree_options())?;
        self.remember(sandbox.root());
        info!(project = %sandbox.root().display(), "opened project");
        Ok(tree)
    }

    fn create_project(&self, path: &Path) -> Result<FileNode, CommandError> {
        let tree = create_skeleton(path, &self.tree_options())?;
        self.remember(&tree.path);
        Ok(tree)
    }

    /// A failure to update the recent list is logged; it never fails the open.
    fn remember(&self, root: &Path) {
        if let Err(err) = self.settings.lock().record_project_open(root) {
            warn!(project = %root.display(), error = %err, "could not record recent project");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("settings", &self.settings.lock().path())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
