pub mod config;
pub mod global;
pub mod recent;

pub use config::{
    default_config_dir, AppConfig, CompileSettings, EngineSettings, CONFIG_DIR_ENV,
    CONFIG_FILE_NAME,
};
pub use global::{GlobalSettings, GlobalSettingsStore, SettingsError, SETTINGS_FILE_NAME};
pub use recent::{RecentProjects, MAX_RECENT_PROJECTS};
