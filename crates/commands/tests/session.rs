use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use incipit_commands::{Command, CommandError, ErrorKind, Response, Session};
use incipit_compile::{Engine, EngineFailure, EngineJob};
use incipit_project::ProjectMeta;
use incipit_settings::{AppConfig, GlobalSettingsStore};
use serde_json::json;
use tempfile::{tempdir, TempDir};

/// Emits the target's text behind a PDF marker; `\fail` produces diagnostics.
struct EchoEngine;

impl Engine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn compile(&self, job: &EngineJob<'_>) -> Result<Vec<u8>, EngineFailure> {
        let text = job.read_to_string(job.target())?;
        if text.contains("\\fail") {
            return Err(EngineFailure::Diagnostics("! Emergency stop.".into()));
        }
        Ok(format!("%PDF-echo\n{text}").into_bytes())
    }
}

/// Echoes like [`EchoEngine`], but holds every run until released.
#[derive(Default)]
struct HeldEngine {
    entered: AtomicBool,
    open: Mutex<bool>,
    signal: Condvar,
}

impl HeldEngine {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }
}

impl Engine for HeldEngine {
    fn name(&self) -> &str {
        "held"
    }

    fn compile(&self, job: &EngineJob<'_>) -> Result<Vec<u8>, EngineFailure> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
        drop(open);
        EchoEngine.compile(job)
    }
}

struct Fixture {
    _config: TempDir,
    workspace: TempDir,
    session: Session,
}

impl Fixture {
    fn new() -> Self {
        Self::with_engine(Arc::new(EchoEngine))
    }

    fn with_engine(engine: Arc<dyn Engine>) -> Self {
        let config = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        let session = Session::new(
            GlobalSettingsStore::in_dir(config.path()),
            AppConfig::default(),
            engine,
        );
        Self {
            _config: config,
            workspace,
            session,
        }
    }

    fn project(&self, name: &str) -> PathBuf {
        self.workspace.path().join(name)
    }

    async fn run(&self, command: Command) -> Result<Response, CommandError> {
        self.session.dispatch(command).await
    }
}

fn tree(response: Response) -> incipit_project::FileNode {
    match response {
        Response::Tree(tree) => tree,
        other => panic!("expected tree, got {other:?}"),
    }
}

#[tokio::test]
async fn create_then_open_records_recent_projects() {
    let fixture = Fixture::new();
    let thesis = fixture.project("thesis");
    let notes = fixture.project("notes");

    let created = tree(
        fixture
            .run(Command::CreateNewProject {
                path: thesis.clone(),
            })
            .await
            .unwrap(),
    );
    assert!(created.find(Path::new("main.tex")).is_some());
    assert!(created
        .find(Path::new("chapters/introduction.tex"))
        .is_some());

    fs::create_dir_all(&notes).unwrap();
    fs::write(notes.join("notes.tex"), "notes").unwrap();
    fixture
        .run(Command::OpenProject { path: notes.clone() })
        .await
        .unwrap();
    fixture
        .run(Command::OpenProject {
            path: thesis.clone(),
        })
        .await
        .unwrap();

    let settings = match fixture.run(Command::LoadGlobalSettings).await.unwrap() {
        Response::GlobalSettings(settings) => settings,
        other => panic!("unexpected response {other:?}"),
    };
    let recent = settings.recent_projects.to_vec();
    assert_eq!(
        recent,
        vec![
            fs::canonicalize(&thesis).unwrap(),
            fs::canonicalize(&notes).unwrap()
        ]
    );
}

#[tokio::test]
async fn create_refuses_non_empty_directory() {
    let fixture = Fixture::new();
    let path = fixture.project("occupied");
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("draft.tex"), "keep me").unwrap();

    let err = fixture
        .run(Command::CreateNewProject { path: path.clone() })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
    assert_eq!(fs::read_to_string(path.join("draft.tex")).unwrap(), "keep me");
}

#[tokio::test]
async fn open_missing_project_is_an_error() {
    let fixture = Fixture::new();
    let err = fixture
        .run(Command::OpenProject {
            path: fixture.project("absent"),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingDependency);
}

#[tokio::test]
async fn save_and_read_files_inside_the_sandbox() {
    let fixture = Fixture::new();
    let root = fixture.project("paper");
    fixture
        .run(Command::CreateNewProject { path: root.clone() })
        .await
        .unwrap();

    fixture
        .run(Command::SaveFile {
            project_root: root.clone(),
            relative_path: "chapters/results.tex".into(),
            content: "\\section{Results}".into(),
        })
        .await
        .unwrap();
    let content = fixture
        .run(Command::ReadFile {
            project_root: root.clone(),
            relative_path: "chapters/results.tex".into(),
        })
        .await
        .unwrap();
    assert_eq!(content, Response::Content("\\section{Results}".into()));

    let err = fixture
        .run(Command::SaveFile {
            project_root: root.clone(),
            relative_path: "../escape.tex".into(),
            content: "x".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Security);
    assert!(!fixture.workspace.path().join("escape.tex").exists());
}

#[tokio::test]
async fn project_meta_round_trips_unknown_fields() {
    let fixture = Fixture::new();
    let root = fixture.project("meta");
    fs::create_dir_all(&root).unwrap();

    let meta = match fixture
        .run(Command::LoadProjectMeta {
            project_root: root.clone(),
        })
        .await
        .unwrap()
    {
        Response::ProjectMeta(meta) => meta,
        other => panic!("unexpected response {other:?}"),
    };
    assert_eq!(meta, ProjectMeta::default());

    let mut meta: ProjectMeta = serde_json::from_value(json!({
        "root_file": "thesis.tex",
        "project_settings": { "bibliography": "refs.bib" },
        "pinned_tabs": ["a.tex"]
    }))
    .unwrap();
    meta.select_file("chapters/a.tex");
    fixture
        .run(Command::SaveProjectMeta {
            project_root: root.clone(),
            meta: meta.clone(),
        })
        .await
        .unwrap();

    let loaded = fixture
        .run(Command::LoadProjectMeta { project_root: root })
        .await
        .unwrap();
    assert_eq!(loaded, Response::ProjectMeta(meta));
}

#[tokio::test]
async fn pdf_commands_follow_compilation() {
    let fixture = Fixture::new();
    let root = fixture.project("report");
    fixture
        .run(Command::CreateNewProject { path: root.clone() })
        .await
        .unwrap();

    let exists = fixture
        .run(Command::CheckPdfExists {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
        })
        .await
        .unwrap();
    assert_eq!(exists, Response::Exists(false));
    let err = fixture
        .run(Command::LoadPdf {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingDependency);

    let compiled = fixture
        .run(Command::CompileLatexProject {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
            unsaved_buffer: Some("draft \\input{chapters/introduction}".into()),
            no_wait: false,
        })
        .await
        .unwrap();
    let artifact = match compiled {
        Response::Pdf(artifact) => artifact,
        other => panic!("unexpected response {other:?}"),
    };
    assert!(String::from_utf8_lossy(&artifact.bytes).contains("draft"));

    let exists = fixture
        .run(Command::CheckPdfExists {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
        })
        .await
        .unwrap();
    assert_eq!(exists, Response::Exists(true));
    let loaded = fixture
        .run(Command::LoadPdf {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
        })
        .await
        .unwrap();
    match loaded {
        Response::Pdf(loaded) => assert_eq!(loaded.bytes, artifact.bytes),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn compile_errors_are_structured() {
    let fixture = Fixture::new();
    let root = fixture.project("broken");
    fixture
        .run(Command::CreateNewProject { path: root.clone() })
        .await
        .unwrap();

    let err = fixture
        .run(Command::CompileLatexProject {
            project_root: root.clone(),
            relative_path: "main.tex".into(),
            unsaved_buffer: Some("\\fail".into()),
            no_wait: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Engine);
    assert!(err.message.contains("! Emergency stop."));

    let err = fixture
        .run(Command::CompileLatexProject {
            project_root: root,
            relative_path: "main.tex".into(),
            unsaved_buffer: Some("\\input{chapters/missing}".into()),
            no_wait: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingDependency);
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(value["kind"], "MissingDependency");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_wait_compile_is_busy_while_target_compiles() {
    let engine = Arc::new(HeldEngine::default());
    let fixture = Fixture::with_engine(engine.clone());
    let root = fixture.project("busy");
    fixture
        .run(Command::CreateNewProject { path: root.clone() })
        .await
        .unwrap();
    let compile = |no_wait| Command::CompileLatexProject {
        project_root: root.clone(),
        relative_path: "main.tex".into(),
        unsaved_buffer: Some("held draft".into()),
        no_wait,
    };

    let waiting = fixture.run(compile(false));
    let rejected = async {
        while !engine.entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let result = fixture.run(compile(true)).await;
        engine.release();
        result
    };
    let (waiting, rejected) = tokio::join!(waiting, rejected);

    match waiting.unwrap() {
        Response::Pdf(artifact) => {
            assert!(String::from_utf8_lossy(&artifact.bytes).contains("held draft"))
        }
        other => panic!("unexpected response {other:?}"),
    }
    let err = rejected.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Busy);
    assert_eq!(serde_json::to_value(&err).unwrap()["kind"], "Busy");
}
