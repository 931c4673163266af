use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ProjectError;
use crate::util::write_atomic;

/// File name of the per-project metadata record, stored at the project root.
pub const META_FILE_NAME: &str = ".incipit";

/// Root document used when a project does not say otherwise.
pub const DEFAULT_ROOT_FILE: &str = "main.tex";

/// Per-project metadata persisted alongside the project.
/// 與專案一同保存的專案中繼資料。
///
/// Keys this version does not know about are kept in `extra` and written back
/// unchanged, as is everything inside `project_settings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMeta {
    #[serde(default)]
    pub last_opened_file: Option<String>,
    #[serde(default = "default_root_file")]
    pub root_file: String,
    #[serde(default)]
    pub project_settings: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_root_file() -> String {
    DEFAULT_ROOT_FILE.to_string()
}

impl Default for ProjectMeta {
    fn default() -> Self {
        Self {
            last_opened_file: None,
            root_file: default_root_file(),
            project_settings: Map::new(),
            extra: Map::new(),
        }
    }
}

impl ProjectMeta {
    /// Records a file selection in the editor.
    /// 紀錄編輯器中選取的檔案。
    pub fn select_file(&mut self, relative: impl Into<String>) {
        self.last_opened_file = Some(relative.into());
    }

    pub fn sanitize(&mut self) {
        if self.root_file.trim().is_empty() {
            self.root_file = default_root_file();
        }
        if matches!(&self.last_opened_file, Some(file) if file.trim().is_empty()) {
            self.last_opened_file = None;
        }
    }
}

/// Loads and saves the `.incipit` record of one project.
/// 讀寫單一專案的 `.incipit` 紀錄。
#[derive(Debug, Clone)]
pub struct ProjectMetaStore {
    path: PathBuf,
}

impl ProjectMetaStore {
    /// Binds the store to `<project_root>/.incipit`.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self {
            path: project_root.as_ref().join(META_FILE_NAME),
        }
    }

    /// Returns the backing path used for persistence.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record, falling back to defaults when absent or malformed.
    /// 載入紀錄；若不存在或格式錯誤則回傳預設值。
    ///
    /// A malformed record is logged and never reported to the caller.
    pub fn load(&self) -> ProjectMeta {
        match self.load_strict() {
            Ok(Some(meta)) => meta,
            Ok(None) => ProjectMeta::default(),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "malformed project metadata, using defaults"
                );
                ProjectMeta::default()
            }
        }
    }

    /// Loads the record, returning `Ok(None)` when the file is absent.
    pub fn load_strict(&self) -> Result<Option<ProjectMeta>, ProjectError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let mut meta: ProjectMeta = serde_json::from_str(&contents).map_err(|err| {
                    ProjectError::io(
                        &self.path,
                        std::io::Error::new(ErrorKind::InvalidData, err),
                    )
                })?;
                meta.sanitize();
                Ok(Some(meta))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ProjectError::io(&self.path, err)),
        }
    }

    /// Replaces the whole record on disk.
    /// 以整筆取代方式寫入紀錄。
    pub fn save(&self, meta: &ProjectMeta) -> Result<(), ProjectError> {
        let mut meta = meta.clone();
        meta.sanitize();
        let payload = serde_json::to_vec_pretty(&meta)
            .map_err(|err| ProjectError::Serialize(err.to_string()))?;
        write_atomic(&self.path, &payload).map_err(|err| ProjectError::io(&self.path, err))
    }
}
