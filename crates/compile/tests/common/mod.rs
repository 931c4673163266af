#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use incipit_compile::deps::{references, DependencyKind};
use incipit_compile::{Engine, EngineFailure, EngineJob, Orchestrator, OrchestratorConfig};
use tempfile::TempDir;

/// Stand-in typesetter: inlines `\input` files through the job's reader and
/// emits `%PDF-fake\n` followed by the expanded text. Inputs absent from the
/// project are treated as distribution files and rendered as `[dist:name]`.
/// `\fail` in the source yields diagnostics.
#[derive(Default)]
pub struct FakeTex {
    runs: AtomicUsize,
    gate: Option<Gate>,
}

#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
    entered: AtomicUsize,
}

impl FakeTex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Engine runs block until [`FakeTex::release`] is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            gate: Some(Gate::default()),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn entered(&self) -> usize {
        self.gate
            .as_ref()
            .map_or(0, |gate| gate.entered.load(Ordering::SeqCst))
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            *gate.open.lock().unwrap() = true;
            gate.signal.notify_all();
        }
    }

    fn expand(&self, job: &EngineJob<'_>, path: &Path, depth: usize) -> Result<String, EngineFailure> {
        let text = job.read_to_string(path)?;
        if text.contains("\\fail") {
            return Err(EngineFailure::Diagnostics(format!(
                "! Undefined control sequence.\nl.1 \\fail in {}",
                path.display()
            )));
        }
        let mut output = text.clone();
        if depth < 8 {
            for reference in references(&text) {
                if reference.kind == DependencyKind::Text {
                    let mut included = PathBuf::from(&reference.name);
                    if included.extension().is_none() {
                        included.set_extension("tex");
                    }
                    output.push('\n');
                    if job.exists(&included)? {
                        output.push_str(&self.expand(job, &included, depth + 1)?);
                    } else {
                        output.push_str(&format!("[dist:{}]", reference.name));
                    }
                }
            }
        }
        Ok(output)
    }
}

impl Engine for FakeTex {
    fn name(&self) -> &str {
        "fake-tex"
    }

    fn compile(&self, job: &EngineJob<'_>) -> Result<Vec<u8>, EngineFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = gate.open.lock().unwrap();
            while !*open {
                open = gate.signal.wait(open).unwrap();
            }
        }
        let body = self.expand(job, job.target(), 0)?;
        let mut pdf = b"%PDF-fake\n".to_vec();
        pdf.extend_from_slice(body.as_bytes());
        Ok(pdf)
    }
}

pub fn orchestrator(engine: Arc<FakeTex>, max_parallel: usize) -> Orchestrator {
    Orchestrator::new(
        engine,
        OrchestratorConfig {
            build_dir_name: "build".into(),
            max_parallel,
        },
    )
}

/// `main.tex` inputs `chapters/intro.tex`.
pub fn sample_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("chapters")).unwrap();
    fs::write(
        dir.path().join("main.tex"),
        "\\documentclass{article}\n\\begin{document}\n\\input{chapters/intro}\n\\end{document}\n",
    )
    .unwrap();
    fs::write(dir.path().join("chapters/intro.tex"), "Hello from the introduction.\n").unwrap();
    dir
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
