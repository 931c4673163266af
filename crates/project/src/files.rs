use std::fs;
use std::path::Path;

use crate::error::ProjectError;
use crate::sandbox::ProjectSandbox;
use crate::util::write_atomic;

/// Reads a UTF-8 project file after confining it to the project root.
/// 在確認位於專案根目錄內後讀取 UTF-8 檔案。
pub fn read_file(sandbox: &ProjectSandbox, relative: &Path) -> Result<String, ProjectError> {
    let resolved = sandbox.resolve_existing(relative)?;
    fs::read_to_string(&resolved).map_err(|err| ProjectError::io(relative, err))
}

/// Writes a project file atomically, creating missing parent directories.
/// 以原子方式寫入專案檔案，必要時建立上層資料夾。
pub fn save_file(
    sandbox: &ProjectSandbox,
    relative: &Path,
    content: &str,
) -> Result<(), ProjectError> {
    let resolved = sandbox.resolve_for_write(relative)?;
    write_atomic(&resolved, content.as_bytes()).map_err(|err| ProjectError::io(relative, err))
}
