//! Virtual source view: the unsaved buffer overlays exactly one logical path,
//! every other read is served from disk through the project sandbox.
//! （虛擬來源視圖：未儲存的緩衝內容只覆蓋目標路徑，其餘檔案經沙箱自磁碟讀取。）

use std::fs;
use std::path::{Path, PathBuf};

use incipit_project::{write_atomic, ProjectSandbox, SandboxError};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::deps::{self, Dependency};
use crate::error::{from_io, from_sandbox, CompileError};
use crate::request::CompileRequest;

/// Read access to logical project paths.
/// 讀取邏輯專案路徑的能力。
pub trait SourceRead: Send + Sync {
    fn read(&self, logical: &Path) -> Result<Vec<u8>, CompileError>;

    fn read_to_string(&self, logical: &Path) -> Result<String, CompileError> {
        let bytes = self.read(logical)?;
        String::from_utf8(bytes)
            .map_err(|err| CompileError::io_message(logical, format!("not valid UTF-8: {err}")))
    }
}

/// The resolved source view of one [`CompileRequest`].
#[derive(Debug)]
pub struct VirtualSource {
    sandbox: ProjectSandbox,
    target: PathBuf,
    buffer: Option<String>,
    build_dir_name: String,
}

impl VirtualSource {
    /// Canonicalises the project root and target, rejecting escapes.
    /// 正規化專案根目錄與目標檔案，拒絕跳出根目錄的路徑。
    ///
    /// Without a buffer the target must exist on disk. With a buffer it may be
    /// new, but its location must still resolve inside the root.
    pub fn resolve(request: &CompileRequest, build_dir_name: &str) -> Result<Self, CompileError> {
        let sandbox = ProjectSandbox::open(&request.project_root).map_err(|err| {
            CompileError::io_message(&request.project_root, format!("invalid project root: {err}"))
        })?;
        let target = sandbox
            .normalize(&request.target_file)
            .map_err(|err| from_sandbox(err, None))?;
        if target.as_os_str().is_empty() {
            return Err(CompileError::io_message(
                &request.target_file,
                "target must be a file inside the project",
            ));
        }

        let located = match request.unsaved_buffer {
            Some(_) => sandbox.resolve_for_write(&target),
            None => sandbox.resolve_existing(&target),
        };
        let located = located.map_err(|err| from_sandbox(err, None))?;
        if located.is_dir() {
            return Err(CompileError::io_message(&target, "target is a directory"));
        }

        Ok(Self {
            sandbox,
            target,
            buffer: request.unsaved_buffer.clone(),
            build_dir_name: build_dir_name.to_string(),
        })
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    /// Normalised, root-relative target path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn has_overlay(&self) -> bool {
        self.buffer.is_some()
    }

    /// Checks whether a logical path can be read. Escapes are errors, absence is `false`.
    pub fn exists(&self, logical: &Path) -> Result<bool, CompileError> {
        let relative = self
            .sandbox
            .normalize(logical)
            .map_err(|err| from_sandbox(err, None))?;
        if relative == self.target && self.buffer.is_some() {
            return Ok(true);
        }
        match self.sandbox.resolve_existing(&relative) {
            Ok(resolved) => Ok(resolved.is_file()),
            Err(SandboxError::Missing { .. }) => Ok(false),
            Err(err) => Err(from_sandbox(err, None)),
        }
    }

    /// Walks the inclusion graph from the target, failing on the first
    /// missing or escaping reference.
    pub fn scan_dependencies(&self) -> Result<Vec<Dependency>, CompileError> {
        deps::scan(self)
    }

    /// Copies the view into a private scratch directory for engines that need
    /// real files. The directory is removed when the returned guard drops.
    /// 將視圖複製到私有暫存資料夾；回傳的守衛釋放時會刪除資料夾。
    pub fn materialize(&self) -> Result<ScratchTree, CompileError> {
        let dir = tempfile::Builder::new()
            .prefix("incipit-compile-")
            .tempdir()
            .map_err(|err| CompileError::io_message(std::env::temp_dir(), err.to_string()))?;

        let root = self.root();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() == 0 {
                    return true;
                }
                !(name.starts_with('.') || (entry.depth() == 1 && name == self.build_dir_name))
            });

        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(root).to_path_buf();
                CompileError::io_message(path, err.to_string())
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            if relative == self.target && self.buffer.is_some() {
                continue;
            }
            if entry.path_is_symlink() {
                match self.sandbox.resolve_existing(&relative) {
                    Ok(resolved) if resolved.is_file() => {}
                    Ok(_) | Err(_) => {
                        debug!(path = %relative.display(), "not copying symlink into scratch tree");
                        continue;
                    }
                }
            }
            let bytes = self.read(&relative)?;
            let destination = dir.path().join(&relative);
            write_scratch(&destination, &bytes)?;
        }

        if let Some(buffer) = &self.buffer {
            write_scratch(&dir.path().join(&self.target), buffer.as_bytes())?;
        }

        Ok(ScratchTree {
            dir,
            target: self.target.clone(),
        })
    }
}

fn write_scratch(destination: &Path, bytes: &[u8]) -> Result<(), CompileError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| from_io(parent, &err))?;
    }
    write_atomic(destination, bytes).map_err(|err| from_io(destination, &err))
}

impl SourceRead for VirtualSource {
    fn read(&self, logical: &Path) -> Result<Vec<u8>, CompileError> {
        let relative = self
            .sandbox
            .normalize(logical)
            .map_err(|err| from_sandbox(err, None))?;
        if relative == self.target {
            if let Some(buffer) = &self.buffer {
                return Ok(buffer.as_bytes().to_vec());
            }
        }
        let resolved = self
            .sandbox
            .resolve_existing(&relative)
            .map_err(|err| from_sandbox(err, None))?;
        fs::read(&resolved).map_err(|err| from_io(&relative, &err))
    }
}

/// A materialised copy of a [`VirtualSource`], deleted on drop.
#[derive(Debug)]
pub struct ScratchTree {
    dir: TempDir,
    target: PathBuf,
}

impl ScratchTree {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of the target inside the scratch directory.
    pub fn target_path(&self) -> PathBuf {
        self.dir.path().join(&self.target)
    }
}
