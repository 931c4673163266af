use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use incipit_project::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::recent::{RecentProjects, MAX_RECENT_PROJECTS};

/// File name of the global settings record inside the config directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize settings {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 跨專案共用的全域設定。 / Process-wide settings shared across projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GlobalSettings {
    #[serde(default)]
    pub recent_projects: RecentProjects,
    #[serde(default)]
    pub editor_settings: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GlobalSettings {
    /// Re-applies the uniqueness and capacity rules of the recent list.
    pub fn sanitize(&mut self) {
        let entries = self.recent_projects.to_vec();
        self.recent_projects = RecentProjects::with_entries(MAX_RECENT_PROJECTS, entries);
    }
}

/// Owns the on-disk global settings record.
/// 負責全域設定檔的讀寫。
///
/// Saves replace the whole record. Callers that change one field must load,
/// modify and save; two writers interleaving that sequence can lose an update,
/// which is why the session funnels every write through a single store.
#[derive(Debug, Clone)]
pub struct GlobalSettingsStore {
    path: PathBuf,
}

impl GlobalSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Binds the store to `<config_dir>/settings.json`.
    pub fn in_dir(config_dir: impl AsRef<Path>) -> Self {
        Self::new(config_dir.as_ref().join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 載入設定；不存在或損毀時回傳預設值，不會失敗。 / Loads settings, returning defaults when absent or malformed; never fails.
    pub fn load(&self) -> GlobalSettings {
        match self.load_strict() {
            Ok(settings) => settings,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "malformed global settings, using defaults"
                );
                GlobalSettings::default()
            }
        }
    }

    /// Loads settings and reports unreadable or malformed records.
    pub fn load_strict(&self) -> Result<GlobalSettings, SettingsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(GlobalSettings::default())
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let mut settings: GlobalSettings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;
        settings.sanitize();
        Ok(settings)
    }

    /// 以整筆取代方式儲存。 / Replaces the whole record on disk.
    pub fn save(&self, settings: &GlobalSettings) -> Result<(), SettingsError> {
        let mut settings = settings.clone();
        settings.sanitize();
        let payload =
            serde_json::to_vec_pretty(&settings).map_err(|source| SettingsError::Serialize {
                path: self.path.clone(),
                source,
            })?;
        write_atomic(&self.path, &payload).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Read-modify-write helper used on every project open. Projects whose
    /// directory has since disappeared are dropped from the list.
    /// 每次開啟專案時執行的讀取-修改-寫回流程。
    pub fn record_project_open(
        &self,
        project_root: impl Into<PathBuf>,
    ) -> Result<GlobalSettings, SettingsError> {
        let project_root = project_root.into();
        let mut settings = self.load();
        let pruned = settings.recent_projects.retain_existing();
        if pruned > 0 {
            debug!(pruned, "dropped vanished recent projects");
        }
        settings.recent_projects.add(project_root.clone());
        self.save(&settings)?;
        debug!(project = %project_root.display(), "recorded recent project");
        Ok(settings)
    }
}
