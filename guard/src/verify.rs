//! Auto-verification loop: watch, debounce, run, classify.
//!
//! One loop thread per watched project consumes filesystem events, coalesces
//! bursts behind a debounce window, and runs the project's test command with
//! a hard timeout. Results are classified against the current TDD phase into
//! a transition suggestion. At most one test invocation is in flight per
//! project; runs carry monotonic sequence numbers so a superseded run can
//! finish without overwriting a fresher result.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{classify, parse_test_output};
use crate::core::types::{Phase, Suggestion, TestSummary};
use crate::io::config::ProjectProfile;
use crate::io::process::run_command_with_timeout;
use crate::io::state_store::{StatePaths, load_phase_state};
use crate::io::watcher::{ProjectWatcher, WatchMsg, watch_project};

/// Most recent runs retained per project; older records are evicted FIFO.
const MAX_RUN_RECORDS: usize = 20;

/// Verification misuse errors, recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// `trigger_tests` called for a project that is not being watched.
    NoActiveWatch { root: PathBuf },
    /// `trigger_tests` called while no feature is in a TDD phase.
    NoActivePhase { root: PathBuf },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::NoActiveWatch { root } => {
                write!(f, "no active watch for {} (run start_watching first)", root.display())
            }
            VerifyError::NoActivePhase { root } => {
                write!(f, "no active TDD phase for {}", root.display())
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Parameters for one test command invocation.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Raw result of one test command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInvocation {
    /// Process exit code; `None` when the run timed out or never spawned.
    pub exit_status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Abstraction over test command execution. Tests use scripted runners that
/// return predetermined outcomes without spawning processes.
pub trait TestRunner: Send + Sync + 'static {
    fn run(&self, request: &TestRequest) -> Result<TestInvocation>;
}

/// Runner that spawns the profile's test command as a child process.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &TestRequest) -> Result<TestInvocation> {
        let mut cmd = Command::new(&request.command[0]);
        cmd.args(&request.command[1..]).current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)?;
        Ok(TestInvocation {
            exit_status: if output.timed_out { None } else { output.status.code() },
            success: !output.timed_out && output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: output.timed_out,
        })
    }
}

/// One recorded verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunRecord {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub phase: Phase,
    pub exit_status: Option<i32>,
    pub summary: TestSummary,
    pub timed_out: bool,
    pub suggestion: Suggestion,
}

struct RunLog {
    last_seq: u64,
    records: VecDeque<TestRunRecord>,
}

/// State shared between a project's loop thread and manual triggers.
struct ProjectShared {
    active: AtomicBool,
    /// Held for the duration of a test invocation; enforces single-flight.
    run_lock: Mutex<()>,
    next_seq: AtomicU64,
    log: Mutex<RunLog>,
}

impl ProjectShared {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            run_lock: Mutex::new(()),
            next_seq: AtomicU64::new(1),
            log: Mutex::new(RunLog {
                last_seq: 0,
                records: VecDeque::new(),
            }),
        }
    }

    /// Record a completed run unless a newer one already finished.
    fn push_record(&self, seq: u64, record: TestRunRecord) -> bool {
        let mut log = lock_recovering(&self.log);
        if seq < log.last_seq {
            debug!(seq, last_seq = log.last_seq, "discarding superseded run result");
            return false;
        }
        log.last_seq = seq;
        log.records.push_back(record);
        while log.records.len() > MAX_RUN_RECORDS {
            log.records.pop_front();
        }
        true
    }

    fn last_record(&self) -> Option<TestRunRecord> {
        lock_recovering(&self.log).records.back().cloned()
    }

    fn history(&self) -> Vec<TestRunRecord> {
        lock_recovering(&self.log).records.iter().cloned().collect()
    }
}

struct WatchHandle {
    tx: Sender<WatchMsg>,
    shared: Arc<ProjectShared>,
    profile: ProjectProfile,
    watcher: Option<ProjectWatcher>,
}

/// Explicit per-project registry of verification loops, constructed once at
/// process start and passed by handle.
pub struct Verifier<R: TestRunner> {
    runner: Arc<R>,
    projects: Mutex<HashMap<PathBuf, WatchHandle>>,
}

impl<R: TestRunner> Verifier<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Begin filesystem observation for `root` and start its loop thread.
    ///
    /// An existing watch for the same project is stopped and replaced.
    pub fn start_watching(&self, root: &Path, profile: &ProjectProfile) -> Result<()> {
        profile.validate()?;
        let key = key_for(root);
        let mut projects = lock_recovering(&self.projects);

        if let Some(existing) = projects.get_mut(&key) {
            deactivate(existing);
        }

        let (tx, rx) = channel();
        let watcher = watch_project(&key, &profile.watch_globs, tx.clone())?;
        let shared = Arc::new(ProjectShared::new());

        let thread_shared = shared.clone();
        let thread_runner = self.runner.clone();
        let thread_profile = profile.clone();
        let thread_root = key.clone();
        thread::spawn(move || {
            run_loop(&thread_root, &thread_profile, thread_runner.as_ref(), &thread_shared, &rx);
        });

        info!(root = %key.display(), "watching project");
        projects.insert(
            key,
            WatchHandle {
                tx,
                shared,
                profile: profile.clone(),
                watcher: Some(watcher),
            },
        );
        Ok(())
    }

    /// Tear down the watcher and cancel any pending debounce.
    ///
    /// An in-flight test run drains cooperatively; its result is still
    /// recorded and visible via [`Verifier::last_result`]. No new debounce
    /// cycle starts afterwards.
    pub fn stop_watching(&self, root: &Path) {
        let key = key_for(root);
        let mut projects = lock_recovering(&self.projects);
        if let Some(handle) = projects.get_mut(&key) {
            deactivate(handle);
            info!(root = %key.display(), "stopped watching project");
        }
    }

    /// Run the tests immediately, bypassing the debounce step.
    pub fn trigger_tests(&self, root: &Path) -> Result<TestRunRecord> {
        let key = key_for(root);
        let (shared, profile) = {
            let projects = lock_recovering(&self.projects);
            let handle = projects
                .get(&key)
                .filter(|handle| handle.shared.active.load(Ordering::SeqCst))
                .ok_or(VerifyError::NoActiveWatch { root: key.clone() })?;
            (handle.shared.clone(), handle.profile.clone())
        };

        let phase = active_phase(&key)?.ok_or(VerifyError::NoActivePhase { root: key.clone() })?;
        Ok(run_once(&shared, self.runner.as_ref(), &profile, &key, phase))
    }

    /// Result of the most recently completed run for `root`, if any.
    pub fn last_result(&self, root: &Path) -> Option<TestRunRecord> {
        let projects = lock_recovering(&self.projects);
        projects.get(&key_for(root)).and_then(|h| h.shared.last_record())
    }

    /// All retained run records for `root`, oldest first.
    pub fn run_history(&self, root: &Path) -> Vec<TestRunRecord> {
        let projects = lock_recovering(&self.projects);
        projects
            .get(&key_for(root))
            .map(|h| h.shared.history())
            .unwrap_or_default()
    }
}

fn deactivate(handle: &mut WatchHandle) {
    handle.shared.active.store(false, Ordering::SeqCst);
    let _ = handle.tx.send(WatchMsg::Stop);
    // Dropping the notify watcher stops event delivery immediately.
    handle.watcher.take();
}

/// Phase the verification loop should classify against, read fresh from disk
/// so phase switches made by the hook process take effect between runs.
/// `None` when no feature is active or the feature is idle in READY.
pub fn active_phase(root: &Path) -> Result<Option<Phase>> {
    let paths = StatePaths::new(root);
    let Some(state) = load_phase_state(&paths.phase_path)? else {
        return Ok(None);
    };
    if state.feature_id.is_none() || state.current_phase == Phase::Ready {
        return Ok(None);
    }
    Ok(Some(state.current_phase))
}

/// Event loop for one project: Idle → Debouncing → Running.
///
/// Events arriving while a run is in flight sit in the channel and re-enter
/// the debounce cycle once the run completes, so bursts never spawn a second
/// concurrent process.
fn run_loop<R: TestRunner>(
    root: &Path,
    profile: &ProjectProfile,
    runner: &R,
    shared: &ProjectShared,
    rx: &Receiver<WatchMsg>,
) {
    let debounce = Duration::from_millis(profile.debounce_ms);

    while shared.active.load(Ordering::SeqCst) {
        // Idle: block until the first change event.
        match rx.recv() {
            Err(_) | Ok(WatchMsg::Stop) => break,
            Ok(WatchMsg::Changed(path)) => {
                debug!(path = %path.display(), "change detected, debouncing");
            }
        }

        // Debouncing: each further event resets the quiet-period deadline.
        let mut deadline = Instant::now() + debounce;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(WatchMsg::Changed(_)) => deadline = Instant::now() + debounce,
                Ok(WatchMsg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        if !shared.active.load(Ordering::SeqCst) {
            break;
        }

        match active_phase(root) {
            Ok(Some(phase)) => {
                run_once(shared, runner, profile, root, phase);
            }
            Ok(None) => debug!("no active TDD phase, skipping auto test run"),
            Err(err) => warn!(err = %format!("{err:#}"), "failed to read phase state"),
        }
    }
}

/// Execute one test run under the project's single-flight lock and record it.
///
/// Failures are isolated: a command that cannot spawn is recorded as a failed
/// run and never propagates to kill the loop.
fn run_once<R: TestRunner>(
    shared: &ProjectShared,
    runner: &R,
    profile: &ProjectProfile,
    root: &Path,
    phase: Phase,
) -> TestRunRecord {
    let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
    let _running = lock_recovering(&shared.run_lock);

    let started_at = Utc::now();
    let request = TestRequest {
        workdir: root.to_path_buf(),
        command: profile.test_command.clone(),
        timeout: Duration::from_secs(profile.test_timeout_secs),
        output_limit_bytes: profile.output_limit_bytes,
    };
    info!(command = ?request.command, phase = %phase, "running tests");

    let invocation = match runner.run(&request) {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "test command failed to run");
            TestInvocation {
                exit_status: None,
                success: false,
                stdout: String::new(),
                stderr: format!("test command failed to run: {err:#}"),
                timed_out: false,
            }
        }
    };

    let summary = parse_test_output(&invocation.stdout, &invocation.stderr);
    let suggestion = classify(phase, invocation.success);
    let record = TestRunRecord {
        started_at,
        ended_at: Utc::now(),
        phase,
        exit_status: invocation.exit_status,
        summary,
        timed_out: invocation.timed_out,
        suggestion,
    };
    shared.push_record(seq, record.clone());
    record
}

/// One-shot run outside any watch registry: check the active phase, run the
/// test command, classify. Used by the CLI's manual `test` command.
pub fn run_tests_once<R: TestRunner>(
    root: &Path,
    profile: &ProjectProfile,
    runner: &R,
) -> Result<TestRunRecord> {
    profile.validate()?;
    let key = key_for(root);
    let phase = active_phase(&key)?.ok_or(VerifyError::NoActivePhase { root: key.clone() })?;
    let shared = ProjectShared::new();
    Ok(run_once(&shared, runner, profile, &key, phase))
}

fn key_for(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Lock, recovering from poisoning: a panicked run must not disable the loop.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
