//! Persisted build artifacts under `<project>/<build dir>/`.
//! （建置成果快取：位於專案的建置資料夾中。）

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use incipit_project::{write_atomic, ProjectSandbox, SandboxError};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{from_io, from_sandbox, CompileError};

/// Output of a successful compile. Cloning shares the bytes.
/// 編譯成功的產物；複製時共用位元組內容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    /// Root-relative target the artifact was produced from.
    pub target: PathBuf,
    /// Absolute location of the PDF on disk.
    pub path: PathBuf,
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub bytes: Arc<[u8]>,
    pub fingerprint: String,
    pub produced_at: SystemTime,
}

fn serialize_len<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(bytes.len() as u64)
}

impl BuildArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Default)]
struct WriterSlot {
    newest_ticket: Option<u64>,
}

type SlotKey = (PathBuf, PathBuf);

/// Artifact store keyed by `(project root, target)`.
/// 以（專案根目錄、目標檔）為鍵的成果儲存區。
///
/// Writes go through a temporary sibling and an atomic rename, so a reader
/// sees either the previous PDF or the new one. Each artifact also has a
/// writer slot that records the newest stored submission, which keeps an
/// older, slower run from replacing a newer artifact.
#[derive(Debug)]
pub struct BuildCache {
    build_dir_name: String,
    slots: Mutex<HashMap<SlotKey, Arc<Mutex<WriterSlot>>>>,
}

impl BuildCache {
    pub fn new(build_dir_name: impl Into<String>) -> Self {
        Self {
            build_dir_name: build_dir_name.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Root-relative artifact location: `chapters/a.tex` → `build/chapters/a.pdf`.
    ///
    /// Only `.tex` is dropped; other extensions stay in the name
    /// (`main.ltx` → `build/main.ltx.pdf`). An extensionless `notes` shares
    /// `build/notes.pdf` with `notes.tex`, the same job as far as TeX is
    /// concerned.
    pub fn artifact_relative(&self, target: &Path) -> PathBuf {
        let mut relative = PathBuf::from(&self.build_dir_name);
        if let Some(parent) = target.parent() {
            relative.push(parent);
        }
        let name = match target.extension() {
            Some(extension) if extension.eq_ignore_ascii_case("tex") => target.file_stem(),
            _ => target.file_name(),
        };
        let mut file = name.map(|name| name.to_os_string()).unwrap_or_default();
        file.push(".pdf");
        relative.push(file);
        relative
    }

    /// Absolute artifact location for `target` inside `root`.
    pub fn artifact_path(&self, root: &Path, target: &Path) -> Result<PathBuf, CompileError> {
        let (sandbox, target) = open(root, target)?;
        Ok(sandbox.root().join(self.artifact_relative(&target)))
    }

    /// Identifies the cache slot; content is not hashed.
    pub fn fingerprint(root: &Path, target: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(target.to_string_lossy().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Returns the stored artifact, or `None` when nothing (or an empty file) is stored.
    /// 取得已儲存的成果；若不存在或為空檔則回傳 `None`。
    pub fn lookup(&self, root: &Path, target: &Path) -> Result<Option<BuildArtifact>, CompileError> {
        let (sandbox, target) = open(root, target)?;
        let relative = self.artifact_relative(&target);
        let path = match sandbox.resolve_existing(&relative) {
            Ok(path) => path,
            Err(SandboxError::Missing { .. }) => return Ok(None),
            Err(err) => return Err(from_sandbox(err, None)),
        };
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|err| from_io(&path, &err))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let produced_at = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(Some(BuildArtifact {
            fingerprint: Self::fingerprint(sandbox.root(), &target),
            target,
            path,
            bytes: Arc::from(bytes),
            produced_at,
        }))
    }

    /// Whether a non-empty artifact is stored for `target`.
    pub fn contains(&self, root: &Path, target: &Path) -> Result<bool, CompileError> {
        Ok(self.lookup(root, target)?.is_some())
    }

    /// A stored artifact may stand in for a fresh compile only when no
    /// unsaved buffer is involved and it belongs to the same target.
    pub fn is_fresh(artifact: &BuildArtifact, target: &Path, unsaved_buffer: Option<&str>) -> bool {
        unsaved_buffer.is_none() && artifact.target == target
    }

    /// Atomically replaces the artifact for `target`. Empty output is refused.
    pub fn store(
        &self,
        root: &Path,
        target: &Path,
        bytes: Vec<u8>,
    ) -> Result<BuildArtifact, CompileError> {
        if bytes.is_empty() {
            return Err(CompileError::Engine {
                diagnostics: "compilation produced no output".to_string(),
            });
        }
        let (sandbox, target) = open(root, target)?;
        let relative = self.artifact_relative(&target);
        let path = sandbox
            .resolve_for_write(&relative)
            .map_err(|err| from_sandbox(err, None))?;
        write_atomic(&path, &bytes).map_err(|err| from_io(&path, &err))?;
        let path = fs::canonicalize(&path).unwrap_or(path);

        info!(
            file = %target.display(),
            path = %path.display(),
            bytes = bytes.len(),
            "stored build artifact"
        );
        Ok(BuildArtifact {
            fingerprint: Self::fingerprint(sandbox.root(), &target),
            target,
            path,
            bytes: Arc::from(bytes),
            produced_at: SystemTime::now(),
        })
    }

    /// Stores unless a newer submission for the same artifact already did.
    /// 依提交順序寫入；較舊的提交不會覆蓋較新的成果。
    ///
    /// Slots are keyed by artifact location, so targets sharing a PDF are
    /// ordered against each other too. Returns `Ok(None)` when `ticket` is
    /// older than the recorded one.
    pub fn store_ordered(
        &self,
        root: &Path,
        target: &Path,
        bytes: Vec<u8>,
        ticket: u64,
    ) -> Result<Option<BuildArtifact>, CompileError> {
        let (sandbox, normalized) = open(root, target)?;
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry((
                    sandbox.root().to_path_buf(),
                    self.artifact_relative(&normalized),
                ))
                .or_default()
                .clone()
        };
        let mut slot = slot.lock();
        if slot.newest_ticket.map_or(false, |newest| ticket < newest) {
            debug!(
                file = %target.display(),
                ticket,
                newest = ?slot.newest_ticket,
                "discarding output of superseded compile"
            );
            return Ok(None);
        }
        let artifact = self.store(root, target, bytes)?;
        slot.newest_ticket = Some(ticket);
        Ok(Some(artifact))
    }
}

fn open(root: &Path, target: &Path) -> Result<(ProjectSandbox, PathBuf), CompileError> {
    let sandbox = ProjectSandbox::open(root)
        .map_err(|err| CompileError::io_message(root, format!("invalid project root: {err}")))?;
    let target = sandbox
        .normalize(target)
        .map_err(|err| from_sandbox(err, None))?;
    Ok((sandbox, target))
}
