use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use incipit_project::DEFAULT_BUILD_DIR;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "INCIPIT_CONFIG_DIR";

/// File name of the application configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

const MAX_PARALLEL_LIMIT: usize = 16;

/// Resolves the configuration directory: `$INCIPIT_CONFIG_DIR`, else the
/// platform config directory joined with `incipit`.
pub fn default_config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|dir| dir.join("incipit"))
}

/// 應用程式設定（編譯器、工作執行緒數量、建置資料夾）。 / Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_build_dir")]
    pub build_dir_name: String,
    #[serde(default)]
    pub compile: CompileSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_build_dir() -> String {
    DEFAULT_BUILD_DIR.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            build_dir_name: default_build_dir(),
            compile: CompileSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn sanitize(&mut self) {
        let name = self.build_dir_name.trim();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            self.build_dir_name = default_build_dir();
        }
        self.compile.sanitize();
        self.engine.sanitize();
    }

    /// 載入設定檔；不存在或無法解析時使用預設值。 / Loads `config.json`, using defaults when absent or unparsable.
    pub fn load(config_dir: impl AsRef<Path>) -> Self {
        let path = config_dir.as_ref().join(CONFIG_FILE_NAME);
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "malformed config, using defaults");
                AppConfig::default()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => AppConfig::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable config, using defaults");
                AppConfig::default()
            }
        };
        config.sanitize();
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileSettings {
    /// Number of compiles allowed to run at once across all targets.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_parallel() -> usize {
    std::thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(1)
        .clamp(1, 4)
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompileSettings {
    fn sanitize(&mut self) {
        if self.max_parallel == 0 {
            self.max_parallel = default_max_parallel();
        }
        self.max_parallel = self.max_parallel.min(MAX_PARALLEL_LIMIT);
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }
}

/// External typesetter invocation. `{input}` and `{outdir}` in `args` are
/// substituted per compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Extra environment for the engine process, e.g. `TEXINPUTS`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_program() -> String {
    "tectonic".to_string()
}

fn default_args() -> Vec<String> {
    ["--keep-logs", "--outdir", "{outdir}", "{input}"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            env: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    fn sanitize(&mut self) {
        if self.program.trim().is_empty() {
            self.program = default_program();
            self.args = default_args();
        }
    }
}
