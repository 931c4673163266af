//! Compilation orchestrator.
//! （編譯協調器。）
//!
//! Requests are keyed by `(canonical project root, normalised target)`. At
//! most one run per key is in flight; a request arriving meanwhile becomes the
//! single pending follow-up, and later arrivals replace its content and join
//! its waiters. Runs execute on the blocking pool, gated by a semaphore sized
//! by `max_parallel`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use incipit_project::{ProjectSandbox, DEFAULT_BUILD_DIR};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::{BuildArtifact, BuildCache};
use crate::engine::{Engine, EngineJob};
use crate::error::{from_engine, from_sandbox, CompileError};
use crate::request::{CompileOutcome, CompileRequest, CompileStage};
use crate::resolver::VirtualSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub build_dir_name: String,
    /// Compiles allowed to run at once across all targets.
    pub max_parallel: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            build_dir_name: DEFAULT_BUILD_DIR.to_string(),
            max_parallel: 1,
        }
    }
}

type TargetKey = (PathBuf, PathBuf);
type Waiter = oneshot::Sender<CompileOutcome>;

#[derive(Default)]
struct TargetSlot {
    stage: CompileStage,
    running: bool,
    pending: Option<Pending>,
}

struct Pending {
    request: CompileRequest,
    ticket: u64,
    waiters: Vec<Waiter>,
}

struct Inner {
    engine: Arc<dyn Engine>,
    cache: BuildCache,
    build_dir_name: String,
    permits: Arc<Semaphore>,
    slots: Mutex<HashMap<TargetKey, TargetSlot>>,
    next_ticket: AtomicU64,
    engine_runs: AtomicUsize,
}

/// Drives compiles off the caller's thread.
/// 在呼叫端執行緒之外執行編譯。
///
/// Cloning is cheap; clones share state. `submit` spawns onto the current
/// Tokio runtime and must be called from within one.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.inner.engine.name())
            .field("build_dir_name", &self.inner.build_dir_name)
            .field("engine_runs", &self.engine_runs())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn Engine>, config: OrchestratorConfig) -> Self {
        let max_parallel = config.max_parallel.max(1);
        Self {
            inner: Arc::new(Inner {
                engine,
                cache: BuildCache::new(config.build_dir_name.clone()),
                build_dir_name: config.build_dir_name,
                permits: Arc::new(Semaphore::new(max_parallel)),
                slots: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
                engine_runs: AtomicUsize::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &BuildCache {
        &self.inner.cache
    }

    /// Number of times the engine has been invoked.
    pub fn engine_runs(&self) -> usize {
        self.inner.engine_runs.load(Ordering::SeqCst)
    }

    /// Current stage for a target; `Idle` when it has never been compiled.
    pub fn stage(&self, project_root: &Path, target_file: &Path) -> CompileStage {
        match target_key(project_root, target_file) {
            Ok(key) => self
                .inner
                .slots
                .lock()
                .get(&key)
                .map(|slot| slot.stage)
                .unwrap_or_default(),
            Err(_) => CompileStage::Idle,
        }
    }

    /// Queues a compile and returns immediately.
    /// 排入編譯請求並立即回傳。
    pub fn submit(&self, request: CompileRequest) -> CompileTicket {
        match self.enqueue(request, false) {
            Ok(ticket) => ticket,
            Err(err) => CompileTicket::resolved(CompileOutcome::Failure(err)),
        }
    }

    /// Like [`Orchestrator::submit`], but rejects with `Busy` instead of
    /// queueing when the target is already compiling.
    pub fn try_submit(&self, request: CompileRequest) -> Result<CompileTicket, CompileError> {
        self.enqueue(request, true)
    }

    fn enqueue(
        &self,
        request: CompileRequest,
        reject_running: bool,
    ) -> Result<CompileTicket, CompileError> {
        let key = target_key(&request.project_root, &request.target_file)?;

        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        if slot.running && reject_running {
            return Err(CompileError::Busy { target: key.1 });
        }
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        if slot.running {
            match slot.pending.as_mut() {
                Some(pending) => {
                    debug!(
                        file = %key.1.display(),
                        ticket,
                        replaced = pending.ticket,
                        "coalescing into pending compile"
                    );
                    pending.request = request;
                    pending.ticket = ticket;
                    pending.waiters.push(sender);
                }
                None => {
                    debug!(file = %key.1.display(), ticket, "queueing follow-up compile");
                    slot.pending = Some(Pending {
                        request,
                        ticket,
                        waiters: vec![sender],
                    });
                }
            }
        } else {
            slot.running = true;
            slot.stage = CompileStage::Resolving;
            debug!(file = %key.1.display(), ticket, "stage -> Resolving");
            drop(slots);
            tokio::spawn(drive(self.inner.clone(), key, request, ticket, vec![sender]));
        }

        Ok(CompileTicket { receiver, ticket })
    }

    /// `submit` followed by waiting for the outcome.
    pub async fn compile(&self, request: CompileRequest) -> CompileOutcome {
        self.submit(request).await
    }
}

fn target_key(project_root: &Path, target_file: &Path) -> Result<TargetKey, CompileError> {
    let sandbox = ProjectSandbox::open(project_root).map_err(|err| {
        CompileError::io_message(project_root, format!("invalid project root: {err}"))
    })?;
    let target = sandbox
        .normalize(target_file)
        .map_err(|err| from_sandbox(err, None))?;
    Ok((sandbox.root().to_path_buf(), target))
}

async fn drive(
    inner: Arc<Inner>,
    key: TargetKey,
    mut request: CompileRequest,
    mut ticket: u64,
    mut waiters: Vec<Waiter>,
) {
    loop {
        let outcome = run_once(&inner, &key, request, ticket).await;

        let next = {
            let mut slots = inner.slots.lock();
            let slot = slots.entry(key.clone()).or_default();
            slot.stage = outcome.stage();
            debug!(file = %key.1.display(), ticket, stage = ?slot.stage, "compile finished");
            match slot.pending.take() {
                Some(pending) => {
                    slot.stage = CompileStage::Resolving;
                    Some(pending)
                }
                None => {
                    slot.running = false;
                    None
                }
            }
        };

        for waiter in waiters.drain(..) {
            // A dropped ticket means the caller stopped waiting.
            let _ = waiter.send(outcome.clone());
        }

        match next {
            Some(pending) => {
                debug!(file = %key.1.display(), ticket = pending.ticket, "stage -> Resolving");
                request = pending.request;
                ticket = pending.ticket;
                waiters = pending.waiters;
            }
            None => break,
        }
    }
}

async fn run_once(
    inner: &Arc<Inner>,
    key: &TargetKey,
    request: CompileRequest,
    ticket: u64,
) -> CompileOutcome {
    if request.unsaved_buffer.is_none() {
        let lookup = {
            let inner = inner.clone();
            let (root, target) = key.clone();
            tokio::task::spawn_blocking(move || inner.cache.lookup(&root, &target)).await
        };
        if let Ok(Ok(Some(artifact))) = lookup {
            if BuildCache::is_fresh(&artifact, &key.1, None) {
                debug!(file = %key.1.display(), ticket, "serving cached artifact");
                return CompileOutcome::Success(artifact);
            }
        }
    }

    let permit = match inner.permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return CompileOutcome::Failure(CompileError::io_message(
                &key.1,
                "compile worker pool is closed",
            ))
        }
    };

    let blocking = {
        let inner = inner.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            let result = inner.run_blocking(&key, &request, ticket);
            drop(permit);
            result
        })
    };

    match blocking.await {
        Ok(Ok(artifact)) => CompileOutcome::Success(artifact),
        Ok(Err(err)) => {
            debug!(file = %key.1.display(), ticket, error = %err, "compile failed");
            CompileOutcome::Failure(err)
        }
        Err(err) => {
            warn!(file = %key.1.display(), ticket, error = %err, "compile task aborted");
            CompileOutcome::Failure(CompileError::io_message(
                &key.1,
                format!("compile task aborted: {err}"),
            ))
        }
    }
}

impl Inner {
    fn set_stage(&self, key: &TargetKey, stage: CompileStage) {
        if let Some(slot) = self.slots.lock().get_mut(key) {
            slot.stage = stage;
        }
        debug!(file = %key.1.display(), ?stage, "stage changed");
    }

    fn run_blocking(
        &self,
        key: &TargetKey,
        request: &CompileRequest,
        ticket: u64,
    ) -> Result<BuildArtifact, CompileError> {
        let source = VirtualSource::resolve(request, &self.build_dir_name)?;
        source.scan_dependencies()?;

        self.set_stage(key, CompileStage::Running);
        self.engine_runs.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .engine
            .compile(&EngineJob::new(&source))
            .map_err(from_engine)?;

        let stored = self
            .cache
            .store_ordered(source.root(), source.target(), bytes, ticket)?;
        let artifact = match stored {
            Some(artifact) => artifact,
            None => self
                .cache
                .lookup(source.root(), source.target())?
                .ok_or_else(|| {
                    CompileError::io_message(source.target(), "artifact vanished after compile")
                })?,
        };
        info!(
            engine = self.engine.name(),
            file = %source.target().display(),
            overlay = source.has_overlay(),
            bytes = artifact.len(),
            "compile succeeded"
        );
        Ok(artifact)
    }
}

/// Pending result of [`Orchestrator::submit`].
/// 編譯結果的等待憑證。
///
/// Dropping it abandons the wait; the run still completes.
#[derive(Debug)]
pub struct CompileTicket {
    receiver: oneshot::Receiver<CompileOutcome>,
    ticket: u64,
}

impl CompileTicket {
    fn resolved(outcome: CompileOutcome) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(outcome);
        Self {
            receiver,
            ticket: 0,
        }
    }

    /// Submission number; later submissions have larger numbers.
    pub fn id(&self) -> u64 {
        self.ticket
    }
}

impl Future for CompileTicket {
    type Output = CompileOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                CompileOutcome::Failure(CompileError::io_message(
                    PathBuf::new(),
                    "compile was dropped before completing",
                ))
            })
        })
    }
}
