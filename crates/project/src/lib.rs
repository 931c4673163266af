//! Project model, sandboxed file access and per-project metadata for Incipit.
//! 管理 Incipit 專案檔案樹、沙箱化檔案存取與專案中繼資料的核心模組。

mod util;

pub mod error;
pub mod files;
pub mod meta;
pub mod sandbox;
pub mod skeleton;
pub mod tree;

/// Default name of the build-artifact directory under a project root.
pub const DEFAULT_BUILD_DIR: &str = "build";

pub use error::ProjectError;
pub use files::{read_file, save_file};
pub use meta::{ProjectMeta, ProjectMetaStore, DEFAULT_ROOT_FILE, META_FILE_NAME};
pub use sandbox::{ProjectSandbox, SandboxError};
pub use skeleton::create_skeleton;
pub use tree::{build_tree, build_tree_with, FileNode, TreeOptions};
pub use util::write_atomic;
