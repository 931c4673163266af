//! Engine backed by an external typesetter process.
//! （以外部排版程式實作的引擎。）
//!
//! Each compile materialises the project view into a scratch directory, runs
//! the configured command there with a timeout, and reads
//! `{outdir}/<target stem>.pdf` back.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Engine, EngineFailure, EngineJob};

/// Replaced by the absolute path of the materialised target.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Replaced by the absolute path of the engine's output directory.
pub const OUTDIR_PLACEHOLDER: &str = "{outdir}";

const OUTPUT_DIR_NAME: &str = ".incipit-out";
const POLL_INTERVAL: Duration = Duration::from_millis(15);
/// How long pipe readers may keep going once the process has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// External command configuration.
/// （外部指令設定。）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Adds multiple arguments at once. `{input}` and `{outdir}` are substituted per run.
    /// （一次加入多個參數。）
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Kills the process and reports diagnostics once `timeout` elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn expand_args(&self, input: &Path, outdir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let outdir = outdir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTDIR_PLACEHOLDER, &outdir)
            })
            .collect()
    }
}

impl Engine for ProcessEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn compile(&self, job: &EngineJob<'_>) -> Result<Vec<u8>, EngineFailure> {
        let scratch = job.materialize()?;
        let outdir = scratch.root().join(OUTPUT_DIR_NAME);
        fs::create_dir_all(&outdir).map_err(|err| EngineFailure::Io {
            path: outdir.clone(),
            message: err.to_string(),
        })?;
        let input = scratch.target_path();
        let args = self.expand_args(&input, &outdir);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(scratch.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            command.env(key, value);
        }
        isolate(&mut command);

        debug!(program = %self.program, ?args, "starting engine process");
        let start = Instant::now();
        let child = command.spawn().map_err(|err| EngineFailure::Launch {
            program: self.program.clone(),
            message: err.to_string(),
        })?;
        let run = wait_with_timeout(child, self.timeout).map_err(|err| EngineFailure::Io {
            path: self.program.clone().into(),
            message: err.to_string(),
        })?;
        debug!(
            program = %self.program,
            exit_code = ?run.exit_code,
            timed_out = run.timed_out,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine process finished"
        );

        if run.timed_out || run.exit_code != Some(0) {
            let mut diagnostics = run.diagnostics();
            if run.timed_out {
                if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(&format!(
                    "{} timed out after {:?}",
                    self.program,
                    self.timeout.unwrap_or_default()
                ));
            }
            return Err(EngineFailure::Diagnostics(diagnostics));
        }

        let stem = job
            .target()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pdf = outdir.join(format!("{stem}.pdf"));
        match fs::read(&pdf) {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) | Err(_) => {
                warn!(path = %pdf.display(), "engine exited cleanly without a PDF");
                let mut diagnostics = String::from("compilation produced no output");
                let captured = run.diagnostics();
                if !captured.is_empty() {
                    diagnostics.push('\n');
                    diagnostics.push_str(&captured);
                }
                Err(EngineFailure::Diagnostics(diagnostics))
            }
        }
    }
}

struct ProcessRun {
    exit_code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    timed_out: bool,
}

impl ProcessRun {
    /// stderr followed by stdout, both verbatim.
    fn diagnostics(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&self.stdout);
        if !text.is_empty() && !stdout.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stdout);
        text
    }
}

/// Runs the engine in a fresh process group so a timeout reaches the helpers
/// it forks (latexmk, bibtex, ...).
#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

fn kill_tree(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: signals only the group created for this child by `isolate`.
            if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
                return Ok(());
            }
        }
    }
    child.kill()
}

/// Output of one pipe, filled incrementally by a reader thread.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => sink.lock().extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    Drain { buffer, handle }
}

impl Drain {
    /// Waits for end of file, but never past `deadline`. A reader still
    /// blocked at the deadline is detached and the bytes read so far returned.
    fn collect(self, deadline: Option<Instant>) -> Vec<u8> {
        match deadline {
            None => {
                let _ = self.handle.join();
            }
            Some(deadline) => {
                while !self.handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(POLL_INTERVAL);
                }
                if self.handle.is_finished() {
                    let _ = self.handle.join();
                }
            }
        }
        let mut buffer = self.buffer.lock();
        std::mem::take(&mut *buffer)
    }
}

/// Polls the child until it exits or the timeout elapses. The pipes are
/// drained on their own threads so a chatty engine cannot fill them and stall,
/// and they are abandoned once the deadline has passed.
fn wait_with_timeout(mut child: Child, timeout: Option<Duration>) -> io::Result<ProcessRun> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    let deadline = timeout.map(|limit| start + limit);
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            kill_tree(&mut child)?;
            timed_out = true;
            break child.wait()?;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let grace = Instant::now() + DRAIN_GRACE;
    let drain_deadline = deadline.map(|deadline| deadline.max(grace));
    Ok(ProcessRun {
        exit_code: status.code(),
        stdout: stdout.collect(drain_deadline),
        stderr: stderr.collect(drain_deadline),
        timed_out,
    })
}
