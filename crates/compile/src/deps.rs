//! Pre-flight dependency scan over `\input`-style references.
//! （編譯前的相依檔案掃描。）

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::CompileError;
use crate::resolver::{SourceRead, VirtualSource};

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(input|include|subfile|includegraphics)\s*(?:\[[^\]]*\])?\s*\{([^}]+)\}")
        .unwrap_or_else(|err| panic!("invalid reference pattern: {err}"))
});

static GRAPHICS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\graphicspath\s*\{((?:\s*\{[^{}]*\})+)\s*\}")
        .unwrap_or_else(|err| panic!("invalid graphicspath pattern: {err}"))
});

static GRAPHICS_PATH_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([^{}]*)\}").unwrap_or_else(|err| panic!("invalid graphicspath entry: {err}"))
});

const GRAPHIC_EXTENSIONS: [&str; 5] = ["pdf", "png", "jpg", "jpeg", "eps"];

/// How a dependency was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// `\input`, `\include` or `\subfile`; scanned recursively.
    Text,
    /// `\includegraphics`; checked for existence only.
    Graphic,
}

/// A resolved reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Root-relative path as it will be read.
    pub path: PathBuf,
    /// Document that referenced it.
    pub requested_by: PathBuf,
    pub kind: DependencyKind,
}

/// A reference as it appears in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: DependencyKind,
    pub name: String,
}

/// Extracts references from TeX source, ignoring `%` comments.
pub fn references(source: &str) -> Vec<Reference> {
    let mut found = Vec::new();
    for line in source.lines() {
        let line = strip_comment(line);
        for captures in REFERENCE.captures_iter(line) {
            let kind = match &captures[1] {
                "includegraphics" => DependencyKind::Graphic,
                _ => DependencyKind::Text,
            };
            let name = captures[2].trim();
            // Macro arguments such as `\input{\chapterdir/a}` or `#1` cannot be resolved statically.
            if name.is_empty() || name.contains(['\\', '#']) {
                continue;
            }
            found.push(Reference {
                kind,
                name: name.to_string(),
            });
        }
    }
    found
}

/// Directory prefixes declared with `\graphicspath{{dir/}{other/}}`, in order.
pub fn graphics_paths(source: &str) -> Vec<String> {
    let text: Vec<&str> = source.lines().map(strip_comment).collect();
    let text = text.join("\n");
    let mut prefixes = Vec::new();
    for declaration in GRAPHICS_PATH.captures_iter(&text) {
        for entry in GRAPHICS_PATH_ENTRY.captures_iter(&declaration[1]) {
            let prefix = entry[1].trim();
            if !prefix.is_empty() && !prefix.contains(['\\', '#']) {
                prefixes.push(prefix.to_string());
            }
        }
    }
    prefixes
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b'%' {
            let backslashes = bytes[..index]
                .iter()
                .rev()
                .take_while(|b| **b == b'\\')
                .count();
            if backslashes % 2 == 0 {
                return &line[..index];
            }
        }
    }
    line
}

fn candidates(reference: &Reference, graphics_paths: &[String]) -> Vec<PathBuf> {
    let literal = PathBuf::from(&reference.name);
    let mut names = vec![literal.clone()];
    if reference.kind == DependencyKind::Graphic {
        names.extend(
            graphics_paths
                .iter()
                .map(|prefix| Path::new(prefix).join(&literal)),
        );
    }

    let mut paths = Vec::new();
    for name in names {
        paths.push(name.clone());
        if name.extension().is_none() {
            match reference.kind {
                DependencyKind::Text => paths.push(name.with_extension("tex")),
                DependencyKind::Graphic => paths.extend(
                    GRAPHIC_EXTENSIONS
                        .iter()
                        .map(|extension| name.with_extension(extension)),
                ),
            }
        }
    }
    paths
}

/// A bare name such as `glyphtounicode` may live in the TeX distribution.
fn names_project_path(reference: &Reference) -> bool {
    Path::new(&reference.name)
        .parent()
        .map_or(false, |parent| !parent.as_os_str().is_empty())
}

fn locate(
    source: &VirtualSource,
    reference: &Reference,
    graphics_paths: &[String],
    requested_by: &Path,
) -> Result<Option<PathBuf>, CompileError> {
    for candidate in candidates(reference, graphics_paths) {
        if source
            .exists(&candidate)
            .map_err(|err| err.requested_by(requested_by))?
        {
            return Ok(Some(candidate));
        }
    }
    if names_project_path(reference) {
        return Err(CompileError::MissingDependency {
            path: PathBuf::from(&reference.name),
            requested_by: Some(requested_by.to_path_buf()),
        });
    }
    debug!(
        name = %reference.name,
        document = %requested_by.display(),
        "reference not in project; left to the engine"
    );
    Ok(None)
}

/// Walks the inclusion graph breadth-first from the target. Each text file is
/// scanned once; cycles end the walk silently. Bare names missing from the
/// project are skipped, since the engine may resolve them from its own tree.
pub fn scan(source: &VirtualSource) -> Result<Vec<Dependency>, CompileError> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut found = Vec::new();
    let mut prefixes = Vec::new();

    visited.insert(source.target().to_path_buf());
    queue.push_back(source.target().to_path_buf());

    while let Some(document) = queue.pop_front() {
        let bytes = source.read(&document)?;
        let text = String::from_utf8_lossy(&bytes);
        prefixes.extend(graphics_paths(&text));
        for reference in references(&text) {
            let Some(path) = locate(source, &reference, &prefixes, &document)? else {
                continue;
            };
            let kind = reference.kind;
            let is_text = kind == DependencyKind::Text
                && path.extension().map_or(false, |ext| ext == "tex");
            if is_text && visited.insert(path.clone()) {
                queue.push_back(path.clone());
            }
            found.push(Dependency {
                path,
                requested_by: document.clone(),
                kind,
            });
        }
    }

    debug!(
        file = %source.target().display(),
        dependencies = found.len(),
        "dependency scan complete"
    );
    Ok(found)
}
