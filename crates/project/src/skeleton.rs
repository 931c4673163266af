use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::ProjectError;
use crate::meta::{ProjectMeta, ProjectMetaStore, DEFAULT_ROOT_FILE};
use crate::tree::{build_tree_with, FileNode, TreeOptions};
use crate::util::write_atomic;

const MAIN_TEMPLATE: &str = r"\documentclass{article}

\title{Untitled}
\author{}
\date{\today}

\begin{document}
\maketitle

\input{chapters/introduction.tex}

\end{document}
";

const INTRODUCTION_TEMPLATE: &str = r"\section{Introduction}

Start writing here.
";

/// Initialises a minimal project at `root` and returns its tree.
/// 於 `root` 建立最小專案骨架並回傳檔案樹。
///
/// Refuses a directory that already holds visible entries so an existing
/// project is never overwritten.
pub fn create_skeleton(root: &Path, options: &TreeOptions) -> Result<FileNode, ProjectError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(ProjectError::NotADirectory(root.to_path_buf()));
        }
        let occupied = fs::read_dir(root)
            .map_err(|err| ProjectError::io(root, err))?
            .filter_map(Result::ok)
            .any(|entry| !entry.file_name().to_string_lossy().starts_with('.'));
        if occupied {
            return Err(ProjectError::NotEmpty(root.to_path_buf()));
        }
    }

    let chapters = root.join("chapters");
    fs::create_dir_all(&chapters).map_err(|err| ProjectError::io(&chapters, err))?;
    let figures = root.join("figures");
    fs::create_dir_all(&figures).map_err(|err| ProjectError::io(&figures, err))?;

    let main = root.join(DEFAULT_ROOT_FILE);
    write_atomic(&main, MAIN_TEMPLATE.as_bytes()).map_err(|err| ProjectError::io(&main, err))?;
    let intro = chapters.join("introduction.tex");
    write_atomic(&intro, INTRODUCTION_TEMPLATE.as_bytes())
        .map_err(|err| ProjectError::io(&intro, err))?;

    let mut meta = ProjectMeta::default();
    meta.select_file(DEFAULT_ROOT_FILE);
    ProjectMetaStore::for_project(root).save(&meta)?;

    info!(root = %root.display(), "created project skeleton");
    build_tree_with(root, options)
}
