mod common;

use std::fs;
use std::path::Path;

use common::{orchestrator, sample_project, wait_until, FakeTex};
use incipit_compile::{CompileRequest, CompileStage, ErrorKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compiles_project_with_dependency_from_disk() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 2);

    let outcome = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex"))
        .await;
    let artifact = outcome.into_result().unwrap();

    assert!(!artifact.is_empty());
    let text = String::from_utf8_lossy(&artifact.bytes);
    assert!(text.contains("Hello from the introduction."));
    assert!(artifact.path.ends_with("build/main.pdf"));
    assert_eq!(fs::read(&artifact.path).unwrap(), &*artifact.bytes);
    assert_eq!(
        orchestrator.stage(project.path(), Path::new("main.tex")),
        CompileStage::Succeeded
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_compile_without_buffer_is_served_from_cache() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 2);

    let first = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex"))
        .await
        .into_result()
        .unwrap();
    let second = orchestrator
        .compile(CompileRequest::new(project.path(), "./main.tex"))
        .await
        .into_result()
        .unwrap();

    assert_eq!(engine.runs(), 1);
    assert_eq!(orchestrator.engine_runs(), 1);
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffer_always_recompiles_and_overlays_target_only() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 2);

    orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex"))
        .await
        .into_result()
        .unwrap();
    let edited = orchestrator
        .compile(
            CompileRequest::new(project.path(), "main.tex")
                .with_buffer("Unsaved draft.\n\\input{chapters/intro}\n"),
        )
        .await
        .into_result()
        .unwrap();

    assert_eq!(engine.runs(), 2);
    let text = String::from_utf8_lossy(&edited.bytes);
    assert!(text.contains("Unsaved draft."));
    assert!(text.contains("Hello from the introduction."));
    let on_disk = fs::read_to_string(project.path().join("main.tex")).unwrap();
    assert!(!on_disk.contains("Unsaved draft."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escaping_target_fails_without_running_engine() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    let outcome = orchestrator
        .compile(CompileRequest::new(project.path(), "../outside.tex").with_buffer("x"))
        .await;
    assert_eq!(outcome.error().map(|err| err.kind()), Some(ErrorKind::Security));

    let outcome = orchestrator
        .compile(
            CompileRequest::new(project.path(), "main.tex").with_buffer("\\input{../../etc/passwd}"),
        )
        .await;
    assert_eq!(outcome.error().map(|err| err.kind()), Some(ErrorKind::Security));
    assert_eq!(engine.runs(), 0);
    assert!(!project.path().join("build").exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn symlinked_dependency_leaving_root_is_rejected() {
    let outside = tempfile::tempdir().unwrap();
    fs::write(outside.path().join("secret.tex"), "secret").unwrap();
    let project = sample_project();
    std::os::unix::fs::symlink(
        outside.path().join("secret.tex"),
        project.path().join("chapters/link.tex"),
    )
    .unwrap();

    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);
    let outcome = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex").with_buffer("\\input{chapters/link}"))
        .await;

    let err = outcome.error().cloned().unwrap();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert!(err.to_string().contains("referenced from main.tex"));
    assert_eq!(engine.runs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_dependency_names_requesting_file() {
    let project = sample_project();
    fs::write(
        project.path().join("chapters/intro.tex"),
        "\\input{chapters/absent}\n",
    )
    .unwrap();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    let outcome = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex"))
        .await;
    let err = outcome.error().cloned().unwrap();
    assert_eq!(err.kind(), ErrorKind::MissingDependency);
    assert!(err.to_string().contains("chapters/intro.tex"));
    assert_eq!(
        orchestrator.stage(project.path(), Path::new("main.tex")),
        CompileStage::Failed
    );
    assert_eq!(engine.runs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graphics_found_through_graphicspath() {
    let project = sample_project();
    fs::create_dir_all(project.path().join("figures")).unwrap();
    fs::write(project.path().join("figures/plot.png"), [0x89, b'P', b'N', b'G']).unwrap();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    let artifact = orchestrator
        .compile(
            CompileRequest::new(project.path(), "main.tex")
                .with_buffer("\\graphicspath{{figures/}}\n\\includegraphics{plot}\n"),
        )
        .await
        .into_result()
        .unwrap();

    assert!(String::from_utf8_lossy(&artifact.bytes).contains("includegraphics{plot}"));
    assert_eq!(engine.runs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bare_input_outside_project_is_left_to_engine() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    let artifact = orchestrator
        .compile(
            CompileRequest::new(project.path(), "main.tex")
                .with_buffer("\\input{glyphtounicode}\n\\input{chapters/intro}\n"),
        )
        .await
        .into_result()
        .unwrap();

    let text = String::from_utf8_lossy(&artifact.bytes);
    assert!(text.contains("[dist:glyphtounicode]"));
    assert!(text.contains("Hello from the introduction."));
    assert_eq!(engine.runs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_keeps_previous_artifact() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    let good = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex"))
        .await
        .into_result()
        .unwrap();
    let outcome = orchestrator
        .compile(CompileRequest::new(project.path(), "main.tex").with_buffer("\\fail"))
        .await;

    let err = outcome.error().cloned().unwrap();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(err.to_string().contains("! Undefined control sequence."));
    assert_eq!(fs::read(&good.path).unwrap(), &*good.bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn later_buffer_wins_over_earlier_in_flight_compile() {
    let project = sample_project();
    let engine = FakeTex::gated();
    let orchestrator = orchestrator(engine.clone(), 2);

    let first = orchestrator.submit(
        CompileRequest::new(project.path(), "main.tex").with_buffer("first draft"),
    );
    wait_until(|| engine.entered() == 1).await;
    assert_eq!(
        orchestrator.stage(project.path(), Path::new("main.tex")),
        CompileStage::Running
    );

    let second = orchestrator.submit(
        CompileRequest::new(project.path(), "main.tex").with_buffer("second draft"),
    );
    let third = orchestrator.submit(
        CompileRequest::new(project.path(), "main.tex").with_buffer("third draft"),
    );
    assert!(first.id() < second.id() && second.id() < third.id());
    engine.release();

    let first = first.await.into_result().unwrap();
    let second = second.await.into_result().unwrap();
    let third = third.await.into_result().unwrap();

    assert!(String::from_utf8_lossy(&first.bytes).contains("first draft"));
    assert!(String::from_utf8_lossy(&second.bytes).contains("third draft"));
    assert_eq!(second.bytes, third.bytes);
    assert_eq!(engine.runs(), 2);

    let stored = fs::read(project.path().join("build/main.pdf")).unwrap();
    assert!(String::from_utf8_lossy(&stored).contains("third draft"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn try_submit_reports_busy_while_compiling() {
    let project = sample_project();
    let engine = FakeTex::gated();
    let orchestrator = orchestrator(engine.clone(), 1);

    let running = orchestrator
        .try_submit(CompileRequest::new(project.path(), "main.tex").with_buffer("a"))
        .unwrap();
    wait_until(|| engine.entered() == 1).await;

    let err = orchestrator
        .try_submit(CompileRequest::new(project.path(), "main.tex").with_buffer("b"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    engine.release();
    assert!(running.await.is_success());
    assert!(orchestrator
        .try_submit(CompileRequest::new(project.path(), "main.tex").with_buffer("c"))
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_ticket_still_stores_artifact() {
    let project = sample_project();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 1);

    drop(orchestrator.submit(CompileRequest::new(project.path(), "main.tex").with_buffer("abandoned")));
    wait_until(|| {
        orchestrator.stage(project.path(), Path::new("main.tex")) == CompileStage::Succeeded
    })
    .await;
    let stored = fs::read(project.path().join("build/main.pdf")).unwrap();
    assert!(String::from_utf8_lossy(&stored).contains("abandoned"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn targets_in_different_directories_do_not_collide() {
    let project = sample_project();
    fs::create_dir_all(project.path().join("appendix")).unwrap();
    fs::write(project.path().join("appendix/main.tex"), "appendix body").unwrap();
    let engine = FakeTex::new();
    let orchestrator = orchestrator(engine.clone(), 2);

    let (root_pdf, appendix_pdf) = tokio::join!(
        orchestrator.compile(CompileRequest::new(project.path(), "main.tex")),
        orchestrator.compile(CompileRequest::new(project.path(), "appendix/main.tex")),
    );
    let root_pdf = root_pdf.into_result().unwrap();
    let appendix_pdf = appendix_pdf.into_result().unwrap();

    assert_ne!(root_pdf.path, appendix_pdf.path);
    assert_ne!(root_pdf.fingerprint, appendix_pdf.fingerprint);
    assert!(appendix_pdf.path.ends_with("build/appendix/main.pdf"));
    assert_eq!(engine.runs(), 2);
}
