//! The executor engine.
//!
//! Runs argv vectors under resource caps with streaming output, queueing,
//! cancellation, and deadlines.  Slot accounting uses a global semaphore
//! plus one per session; tokio's fair semaphores give over-cap submissions
//! FIFO ordering.  Every execution is driven by a single owner task, which
//! makes terminal transitions write-once by construction.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::capture::CaptureBuffer;
use crate::error::{ExecError, Result};
use crate::execution::{
    ExecEvent, ExecFailure, ExecStatus, ExecutionSnapshot, SpawnRequest, StreamKind,
};
use crate::parsers::ParserRegistry;

/// Maximum bytes per output chunk delivered to subscribers.
const CHUNK_SIZE: usize = 8 * 1024;

/// Event channel depth per execution.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Executor tunables, mirrored from the `[executor]` config section.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrent executions across all sessions.
    pub max_global: usize,
    /// Concurrent executions per session.
    pub max_per_session: usize,
    /// Deadline applied when the request does not carry one.
    pub default_deadline: Duration,
    /// Grace between SIGTERM and SIGKILL.
    pub grace: Duration,
    /// Root directory for output artifacts.
    pub outputs_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_global: 32,
            max_per_session: 3,
            default_deadline: Duration::from_secs(120),
            grace: Duration::from_secs(5),
            outputs_dir: PathBuf::from("outputs"),
        }
    }
}

/// Shared state for one execution.
struct ExecRecord {
    snapshot: std::sync::Mutex<ExecutionSnapshot>,
    events: broadcast::Sender<ExecEvent>,
    cancel: watch::Sender<bool>,
}

impl ExecRecord {
    fn emit(&self, event: ExecEvent) {
        // No active subscribers is fine; the artifact still records output.
        let _ = self.events.send(event);
    }

    /// Lock the snapshot, recovering from poisoning (the driver never
    /// panics while holding the lock, but a reader might).
    fn lock(&self) -> std::sync::MutexGuard<'_, ExecutionSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Concurrent command executor.
///
/// Cheaply cloneable (`Arc`-backed); safe to share across request tasks.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    config: ExecutorConfig,
    global_slots: Arc<Semaphore>,
    session_slots: DashMap<Uuid, Arc<Semaphore>>,
    executions: DashMap<Uuid, Arc<ExecRecord>>,
    parsers: ParserRegistry,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_parsers(config, ParserRegistry::builtin())
    }

    pub fn with_parsers(config: ExecutorConfig, parsers: ParserRegistry) -> Self {
        let global_slots = Arc::new(Semaphore::new(config.max_global));
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                global_slots,
                session_slots: DashMap::new(),
                executions: DashMap::new(),
                parsers,
            }),
        }
    }

    /// Submit an argv for execution.
    ///
    /// Returns the execution id and a subscription delivering every event
    /// from `queued` onwards.  Over-cap submissions queue FIFO until a
    /// slot frees.
    pub fn submit(&self, request: SpawnRequest) -> (Uuid, broadcast::Receiver<ExecEvent>) {
        let id = Uuid::now_v7();
        let (events, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel, _) = watch::channel(false);

        let snapshot = ExecutionSnapshot {
            id,
            session_id: request.session_id,
            argv: request.argv.clone(),
            mode: request.mode,
            status: ExecStatus::Queued,
            started_at: None,
            ended_at: None,
            return_code: None,
            failure: None,
            stdout_bytes: 0,
            stderr_bytes: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            parsed: None,
            parse_error: None,
        };

        let record = Arc::new(ExecRecord {
            snapshot: std::sync::Mutex::new(snapshot),
            events,
            cancel,
        });
        self.inner.executions.insert(id, Arc::clone(&record));

        tracing::info!(execution_id = %id, argv = ?request.argv, "execution submitted");
        record.emit(ExecEvent::Status {
            status: ExecStatus::Queued,
        });

        // A zero deadline times out immediately, with no spawn side-effects.
        // The transition still happens on a task so subscribers obtained
        // right after submit observe the terminal events.
        if request.deadline.is_zero() {
            tokio::spawn(async move {
                finish(
                    &record,
                    ExecStatus::TimedOut,
                    None,
                    Some(ExecFailure::Timeout),
                );
            });
            return (id, receiver);
        }

        let session_slots = self
            .inner
            .session_slots
            .entry(request.session_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.inner.config.max_per_session)))
            .clone();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            drive(inner, record, request, session_slots).await;
        });

        (id, receiver)
    }

    /// Latest snapshot of an execution.
    pub fn snapshot(&self, id: Uuid) -> Result<ExecutionSnapshot> {
        let record = self.record(id)?;
        let snapshot = record.lock().clone();
        Ok(snapshot)
    }

    /// Subscribe to an execution's future events.
    pub fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<ExecEvent>> {
        Ok(self.record(id)?.events.subscribe())
    }

    /// Request cancellation.  Idempotent and race-safe: the driver task
    /// performs the actual transition, and cancelling an already-terminal
    /// execution is a successful no-op.
    pub fn cancel(&self, id: Uuid) -> Result<ExecStatus> {
        let record = self.record(id)?;
        let status = record.lock().status;
        if status.is_terminal() {
            return Ok(status);
        }
        tracing::info!(execution_id = %id, "cancellation requested");
        record.cancel.send_replace(true);
        Ok(status)
    }

    /// Snapshots of every execution belonging to a session.
    pub fn session_executions(&self, session_id: Uuid) -> Vec<ExecutionSnapshot> {
        self.inner
            .executions
            .iter()
            .filter_map(|entry| {
                let snapshot = entry.value().lock();
                (snapshot.session_id == session_id).then(|| snapshot.clone())
            })
            .collect()
    }

    /// Remove a session's output artifacts and execution records.
    pub async fn purge_session(&self, session_id: Uuid) -> Result<()> {
        self.inner.executions.retain(|_, record| {
            record.lock().session_id != session_id
        });

        let dir = self.inner.config.outputs_dir.join(session_id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, id: Uuid) -> Result<Arc<ExecRecord>> {
        self.inner
            .executions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ExecError::UnknownExecution { id })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("executions", &self.inner.executions.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// How the wait phase ended.
enum WaitOutcome {
    Exited(std::process::ExitStatus),
    Deadline,
    Cancelled,
    WaitError(String),
}

/// Own one execution from queue to terminal state.
async fn drive(
    inner: Arc<ExecutorInner>,
    record: Arc<ExecRecord>,
    request: SpawnRequest,
    session_slots: Arc<Semaphore>,
) {
    let mut cancel_rx = record.cancel.subscribe();

    // Queue phase: wait for a global and a session slot, unless cancelled
    // first.  Dropping a partially acquired permit on cancel is safe.
    // The semaphores are never closed, so acquisition cannot fail.
    let permits = tokio::select! {
        permits = async {
            let global = inner.global_slots.clone().acquire_owned().await.ok()?;
            let session = session_slots.acquire_owned().await.ok()?;
            Some((global, session))
        } => permits,
        _ = cancelled(&mut cancel_rx) => None,
    };

    let Some((_global_permit, _session_permit)) = permits else {
        tracing::info!(execution_id = %exec_id(&record), "cancelled while queued");
        finish(&record, ExecStatus::Cancelled, None, None);
        return;
    };

    if *cancel_rx.borrow() {
        finish(&record, ExecStatus::Cancelled, None, None);
        return;
    }

    transition(&record, ExecStatus::Running);

    let Some(program) = request.argv.first() else {
        finish(
            &record,
            ExecStatus::Failed,
            None,
            Some(ExecFailure::SpawnError {
                reason: "empty argv".into(),
            }),
        );
        return;
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(&request.argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
        let caps = request.caps;
        unsafe {
            cmd.as_std_mut().pre_exec(move || {
                set_rlimit(libc::RLIMIT_CPU, caps.cpu_seconds)?;
                set_rlimit(libc::RLIMIT_AS, caps.mem_bytes)?;
                set_rlimit(libc::RLIMIT_FSIZE, caps.fsize_bytes)?;
                Ok(())
            });
        }
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(execution_id = %exec_id(&record), error = %e, "spawn failed");
            finish(
                &record,
                ExecStatus::Failed,
                None,
                Some(ExecFailure::SpawnError {
                    reason: e.to_string(),
                }),
            );
            return;
        }
    };

    let child_pid = child.id();
    let cap = request.caps.output_cap_bytes;

    let stdout_task = spawn_reader(child.stdout.take(), StreamKind::Out, cap, &record);
    let stderr_task = spawn_reader(child.stderr.take(), StreamKind::Err, cap, &record);

    // Wait phase: process exit, deadline, or cancellation, whichever
    // comes first.
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => WaitOutcome::Exited(status),
            Err(e) => WaitOutcome::WaitError(e.to_string()),
        },
        _ = tokio::time::sleep(request.deadline) => WaitOutcome::Deadline,
        _ = cancelled(&mut cancel_rx) => WaitOutcome::Cancelled,
    };

    let (status, return_code, failure) = match outcome {
        WaitOutcome::Exited(exit) => classify_exit(exit),
        WaitOutcome::Deadline => {
            tracing::warn!(execution_id = %exec_id(&record), "deadline elapsed, terminating");
            let exit = terminate(&mut child, child_pid, inner.config.grace).await;
            (
                ExecStatus::TimedOut,
                exit.map(exit_code),
                Some(ExecFailure::Timeout),
            )
        }
        WaitOutcome::Cancelled => {
            tracing::info!(execution_id = %exec_id(&record), "cancelled while running");
            let exit = terminate(&mut child, child_pid, inner.config.grace).await;
            (ExecStatus::Cancelled, exit.map(exit_code), None)
        }
        WaitOutcome::WaitError(reason) => (
            ExecStatus::Failed,
            None,
            Some(ExecFailure::SpawnError { reason }),
        ),
    };

    // The pipes close when the process group dies, so the readers finish.
    let stdout = join_reader(stdout_task, cap).await;
    let stderr = join_reader(stderr_task, cap).await;

    // Best-effort structured parse of final stdout.
    let mut parsed = None;
    let mut parse_error = None;
    if let Some(parser) = &request.parser {
        if status == ExecStatus::Completed {
            let text = String::from_utf8_lossy(stdout.bytes());
            match inner.parsers.parse(parser, &text) {
                Ok(value) => parsed = value,
                Err(e) => {
                    tracing::debug!(execution_id = %exec_id(&record), error = %e, "output parse failed");
                    parse_error = Some(e);
                }
            }
        }
    }

    {
        let mut snapshot = record.lock();
        snapshot.stdout_bytes = stdout.len() as u64;
        snapshot.stderr_bytes = stderr.len() as u64;
        snapshot.stdout_truncated = stdout.truncated();
        snapshot.stderr_truncated = stderr.truncated();
        snapshot.parsed = parsed;
        snapshot.parse_error = parse_error;
    }

    // Terminal metadata must land in the snapshot before the artifact is
    // flushed, so meta.json records the final state.
    set_terminal(&record, status, return_code, failure.clone());
    write_artifacts(&inner, &record, stdout, stderr).await;
    emit_terminal(&record, status, return_code, failure);
}

/// Resolve on cancellation; never resolves if the cancel channel closed
/// without firing.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Copy one pipe to the subscription and a bounded capture buffer.
fn spawn_reader<R>(
    pipe: Option<R>,
    stream: StreamKind,
    cap: usize,
    record: &Arc<ExecRecord>,
) -> Option<JoinHandle<CaptureBuffer>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    let record = Arc::clone(record);

    Some(tokio::spawn(async move {
        let mut buffer = CaptureBuffer::new(cap);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let admitted = buffer.push(&chunk[..n]);
                    if admitted > 0 {
                        record.emit(ExecEvent::Output {
                            stream,
                            chunk: chunk[..admitted].to_vec(),
                        });
                    }
                }
            }
        }
        buffer
    }))
}

async fn join_reader(task: Option<JoinHandle<CaptureBuffer>>, cap: usize) -> CaptureBuffer {
    match task {
        Some(task) => task.await.unwrap_or_else(|_| CaptureBuffer::new(cap)),
        None => CaptureBuffer::new(cap),
    }
}

/// SIGTERM the process group, wait out the grace period, then SIGKILL.
async fn terminate(
    child: &mut tokio::process::Child,
    pid: Option<u32>,
    grace: Duration,
) -> Option<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_process_group(pid, libc::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => {
            #[cfg(unix)]
            if let Some(pid) = pid {
                signal_process_group(pid, libc::SIGKILL);
            }
            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
            child.wait().await.ok()
        }
    }
}

/// Map a process exit to a terminal status.
fn classify_exit(exit: std::process::ExitStatus) -> (ExecStatus, Option<i32>, Option<ExecFailure>) {
    if exit.success() {
        return (ExecStatus::Completed, Some(0), None);
    }

    let code = exit_code(exit);

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGXCPU / SIGXFSZ / SIGKILL without a cancel or deadline in play
        // mean a resource cap fired.
        if matches!(
            exit.signal(),
            Some(libc::SIGXCPU) | Some(libc::SIGXFSZ) | Some(libc::SIGKILL)
        ) {
            return (
                ExecStatus::Failed,
                Some(code),
                Some(ExecFailure::ResourceExceeded),
            );
        }
    }

    (
        ExecStatus::Failed,
        Some(code),
        Some(ExecFailure::NonZeroExit { code }),
    )
}

/// Exit code, with signal terminations mapped to negative codes the way
/// shells report them.
fn exit_code(exit: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        exit.code()
            .unwrap_or_else(|| -exit.signal().unwrap_or(1))
    }
    #[cfg(not(unix))]
    {
        exit.code().unwrap_or(-1)
    }
}

#[cfg(unix)]
fn set_rlimit(resource: libc::__rlimit_resource_t, limit: u64) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // SAFETY: called in the forked child before exec; rlim is a valid
    // struct for the duration of the call.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Send a signal to every process in the child's group.
///
/// Sound because `pid` comes from a just-spawned child that was made its
/// own group leader via `process_group(0)`.
#[cfg(unix)]
fn signal_process_group(pid: u32, signal: i32) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// Move a non-terminal execution to `Running`.
fn transition(record: &Arc<ExecRecord>, status: ExecStatus) {
    {
        let mut snapshot = record.lock();
        snapshot.status = status;
        if status == ExecStatus::Running {
            snapshot.started_at = Some(Utc::now());
        }
    }
    record.emit(ExecEvent::Status { status });
}

/// Apply the terminal state and emit the closing events.
fn finish(
    record: &Arc<ExecRecord>,
    status: ExecStatus,
    return_code: Option<i32>,
    failure: Option<ExecFailure>,
) {
    set_terminal(record, status, return_code, failure.clone());
    emit_terminal(record, status, return_code, failure);
}

/// Record the terminal state on the snapshot (write-once).
fn set_terminal(
    record: &Arc<ExecRecord>,
    status: ExecStatus,
    return_code: Option<i32>,
    failure: Option<ExecFailure>,
) {
    let mut snapshot = record.lock();
    debug_assert!(!snapshot.status.is_terminal(), "terminal status is write-once");
    snapshot.status = status;
    snapshot.ended_at = Some(Utc::now());
    snapshot.return_code = return_code;
    snapshot.failure = failure;
}

/// Emit the terminal status and the closing `Complete` event.  Terminal
/// events follow every output event for the execution.
fn emit_terminal(
    record: &Arc<ExecRecord>,
    status: ExecStatus,
    return_code: Option<i32>,
    failure: Option<ExecFailure>,
) {
    tracing::info!(
        execution_id = %exec_id(record),
        status = %status,
        return_code = ?return_code,
        "execution finished"
    );

    record.emit(ExecEvent::Status { status });
    record.emit(ExecEvent::Complete {
        return_code,
        failure,
    });
}

fn exec_id(record: &Arc<ExecRecord>) -> Uuid {
    record.lock().id
}

/// Flush capture buffers and metadata to the session's artifact directory.
async fn write_artifacts(
    inner: &Arc<ExecutorInner>,
    record: &Arc<ExecRecord>,
    stdout: CaptureBuffer,
    stderr: CaptureBuffer,
) {
    let (id, session_id, meta) = {
        let snapshot = record.lock();
        let meta = serde_json::to_value(&*snapshot).unwrap_or_default();
        (snapshot.id, snapshot.session_id, meta)
    };

    let dir = inner.config.outputs_dir.join(session_id.to_string());
    let result: std::io::Result<()> = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(format!("{id}.stdout")), stdout.into_bytes()).await?;
        tokio::fs::write(dir.join(format!("{id}.stderr")), stderr.into_bytes()).await?;
        let meta_text = serde_json::to_string_pretty(&meta).unwrap_or_default();
        tokio::fs::write(dir.join(format!("{id}.meta.json")), meta_text).await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(execution_id = %id, error = %e, "failed to write output artifacts");
    }
}
