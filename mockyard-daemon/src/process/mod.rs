//! Supervision of mock server processes
//!
//! This module provides:
//! - `Supervisor` - spawns one mock server per port with its output logged
//! - `ProcessHandle` - owner's side of a running process, used to stop it
//! - `ProcessExitEvent` - published when a process exits on its own
//!
//! Every process gets a monitor task that owns the `Child`. The monitor waits
//! for either a natural exit or a stop request and always reaps the child,
//! drains its output and closes the log before finishing.

mod signal;
mod spawn;

pub use signal::is_process_alive;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{DaemonError, Result};
use crate::logs::{LogSink, LogStream, LogWriter};
use signal::{StopSignal, signal_group};

/// How long to wait for a process to die after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How long output pumps may keep draining after the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Message for process exit events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExitEvent {
    pub port: u16,
    pub instance_id: u64,
    pub exit_code: Option<i32>,
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Exited after SIGTERM
    Graceful { exit_code: Option<i32> },
    /// Ignored SIGTERM for the whole stop timeout and was killed
    Killed,
    /// Had already exited before the request arrived
    AlreadyExited { exit_code: Option<i32> },
}

type StopReply = oneshot::Sender<io::Result<TerminateOutcome>>;

/// Spawns and stops mock server processes
#[derive(Debug, Clone)]
pub struct Supervisor {
    program: PathBuf,
    logs_dir: PathBuf,
    stop_timeout: Duration,
    startup_grace: Duration,
}

/// Parameters for spawning one mock server
pub struct SpawnParams<'a> {
    pub port: u16,
    pub config_path: &'a Path,
    pub instance_id: u64,
    pub exit_tx: mpsc::Sender<ProcessExitEvent>,
}

impl Supervisor {
    pub fn new(
        program: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        stop_timeout: Duration,
        startup_grace: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            logs_dir: logs_dir.into(),
            stop_timeout,
            startup_grace,
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Launch a mock server serving `config_path` on `port`.
    ///
    /// Returns once the process has survived the startup grace period. A
    /// process that exits earlier is reported as `SpawnFailed`.
    pub async fn spawn(&self, params: SpawnParams<'_>) -> Result<ProcessHandle> {
        let SpawnParams {
            port,
            config_path,
            instance_id,
            exit_tx,
        } = params;

        let spawn_failed = |source: io::Error| DaemonError::SpawnFailed { port, source };

        let args = spawn::mock_server_args(config_path, port);
        let command_line = format!("{} {}", self.program.display(), args.join(" "));
        let sink = LogSink::open(&self.logs_dir, port, &command_line).map_err(spawn_failed)?;

        info!("Starting mock server on port {}: {}", port, command_line);

        let mut cmd = spawn::build_command(&self.program, &args);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                sink.close(&format!("failed to start: {}", e));
                return Err(spawn_failed(e));
            }
        };

        let pid = child.id();
        debug!("Mock server on port {} spawned with PID {:?}", port, pid);

        let pumps = vec![
            spawn::spawn_capture_task(
                child.stdout.take(),
                open_writer(&sink, LogStream::Stdout, port),
            ),
            spawn::spawn_capture_task(
                child.stderr.take(),
                open_writer(&sink, LogStream::Stderr, port),
            ),
        ];

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (exit_state_tx, exit_state_rx) = watch::channel(None);

        tokio::spawn(monitor_process(MonitorTask {
            port,
            instance_id,
            child,
            sink,
            pumps,
            shutdown_rx,
            exit_tx,
            exit_state: exit_state_tx,
            stop_timeout: self.stop_timeout,
        }));

        let mut handle = ProcessHandle {
            port,
            pid,
            shutdown_tx: Some(shutdown_tx),
            exit_state: exit_state_rx,
            stop_timeout: self.stop_timeout,
        };

        if !self.startup_grace.is_zero() {
            let exited = tokio::time::timeout(
                self.startup_grace,
                handle.exit_state.wait_for(|state| state.is_some()),
            )
            .await;

            let exited: Option<Option<i32>> = match exited {
                Ok(Ok(state)) => *state,
                _ => None,
            };
            if let Some(exit_code) = exited {
                warn!(
                    "Mock server on port {} exited during startup with code {:?}",
                    port, exit_code
                );
                return Err(spawn_failed(io::Error::other(format!(
                    "exited during startup with code {:?}",
                    exit_code
                ))));
            }
        }

        Ok(handle)
    }
}

fn open_writer(sink: &LogSink, stream: LogStream, port: u16) -> Option<LogWriter> {
    match sink.writer(stream) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("Cannot log {} of port {}: {}", stream, port, e);
            None
        }
    }
}

/// Handle to a running mock server.
///
/// Dropping the handle without calling [`ProcessHandle::terminate`] kills the
/// process group.
#[derive(Debug)]
pub struct ProcessHandle {
    port: u16,
    pid: Option<u32>,
    shutdown_tx: Option<oneshot::Sender<StopReply>>,
    exit_state: watch::Receiver<Option<Option<i32>>>,
    stop_timeout: Duration,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_state.borrow().is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_state.borrow().flatten()
    }

    /// Stop the process: SIGTERM to its group, SIGKILL after the stop timeout.
    ///
    /// Returns once the process has been reaped and its log closed.
    pub async fn terminate(mut self) -> io::Result<TerminateOutcome> {
        let already_exited = |handle: &Self| TerminateOutcome::AlreadyExited {
            exit_code: handle.exit_code(),
        };

        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(already_exited(&self));
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if shutdown_tx.send(reply_tx).is_err() {
            // Monitor already finished after a natural exit
            return Ok(already_exited(&self));
        }

        let bound = self.stop_timeout + KILL_WAIT + OUTPUT_DRAIN_TIMEOUT;
        match tokio::time::timeout(bound, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Ok(already_exited(&self)),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("mock server on port {} did not stop in {:?}", self.port, bound),
            )),
        }
    }
}

#[cfg(test)]
impl ProcessHandle {
    /// Handle with no process behind it whose stop request gets `reply`
    pub(crate) fn answering(port: u16, reply: io::Result<TerminateOutcome>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<StopReply>();
        let (exit_state_tx, exit_state) = watch::channel(None);
        tokio::spawn(async move {
            if let Ok(reply_tx) = shutdown_rx.await {
                let _ = exit_state_tx.send(Some(None));
                let _ = reply_tx.send(reply);
            }
        });
        Self {
            port,
            pid: None,
            shutdown_tx: Some(shutdown_tx),
            exit_state,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

struct MonitorTask {
    port: u16,
    instance_id: u64,
    child: Child,
    sink: LogSink,
    pumps: Vec<JoinHandle<()>>,
    shutdown_rx: oneshot::Receiver<StopReply>,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
    exit_state: watch::Sender<Option<Option<i32>>>,
    stop_timeout: Duration,
}

/// Wait for the process to exit or for a stop request, whichever comes first
async fn monitor_process(task: MonitorTask) {
    let MonitorTask {
        port,
        instance_id,
        mut child,
        sink,
        pumps,
        shutdown_rx,
        exit_tx,
        exit_state,
        stop_timeout,
    } = task;

    tokio::select! {
        result = child.wait() => {
            let exit_code = result.ok().and_then(|s| s.code());
            info!("Mock server on port {} exited with code {:?}", port, exit_code);

            let _ = exit_state.send(Some(exit_code));
            finish_output(pumps, sink, &format!("exited with code {:?}", exit_code)).await;

            send_exit_event(&exit_tx, ProcessExitEvent {
                port,
                instance_id,
                exit_code,
            })
            .await;
        }
        request = shutdown_rx => {
            match request {
                Ok(reply) => {
                    let result = terminate_child(port, &mut child, stop_timeout).await;
                    let (exit_code, reason) = match &result {
                        Ok(TerminateOutcome::Killed) => (None, "killed after stop timeout".to_string()),
                        Ok(outcome) => (outcome.exit_code(), format!("stopped with code {:?}", outcome.exit_code())),
                        Err(e) => (None, format!("stop failed: {}", e)),
                    };
                    let _ = exit_state.send(Some(exit_code));
                    finish_output(pumps, sink, &reason).await;
                    let _ = reply.send(result);
                }
                Err(_) => {
                    debug!("Handle for port {} dropped, killing process group", port);
                    if let Err(e) = signal_group(&mut child, StopSignal::Kill) {
                        warn!("Failed to kill process group on port {}: {}", port, e);
                    }
                    let _ = child.kill().await;
                    let _ = exit_state.send(Some(None));
                    finish_output(pumps, sink, "killed").await;
                }
            }
        }
    }
}

async fn terminate_child(
    port: u16,
    child: &mut Child,
    stop_timeout: Duration,
) -> io::Result<TerminateOutcome> {
    debug!("Sending SIGTERM to mock server on port {} (pid {:?})", port, child.id());
    if let Err(e) = signal_group(child, StopSignal::Terminate) {
        warn!("Failed to send SIGTERM on port {}: {}", port, e);
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("Mock server on port {} stopped with status {:?}", port, status);
            Ok(TerminateOutcome::Graceful {
                exit_code: status.code(),
            })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                "Mock server on port {} did not stop within {:?}, sending SIGKILL",
                port, stop_timeout
            );
            signal_group(child, StopSignal::Kill)?;
            match tokio::time::timeout(KILL_WAIT, child.wait()).await {
                Ok(Ok(_)) => Ok(TerminateOutcome::Killed),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "process survived SIGKILL",
                )),
            }
        }
    }
}

/// Let the output pumps drain what is left in the pipes, then close the log
async fn finish_output(pumps: Vec<JoinHandle<()>>, sink: LogSink, reason: &str) {
    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    for mut pump in pumps {
        if tokio::time::timeout_at(deadline, &mut pump).await.is_err() {
            // A descendant still holds the pipe open
            pump.abort();
        }
    }
    sink.close(reason);
}

async fn send_exit_event(exit_tx: &mpsc::Sender<ProcessExitEvent>, event: ProcessExitEvent) {
    let port = event.port;
    match exit_tx.try_send(event) {
        Ok(_) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(
                "Exit event channel near capacity for port {}, applying backpressure",
                port
            );
            let send_result =
                tokio::time::timeout(Duration::from_secs(5), exit_tx.send(event)).await;
            if send_result.is_err() {
                warn!("Failed to send exit event for port {} - channel timeout", port);
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Exit event channel closed for port {}", port);
        }
    }
}

impl TerminateOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TerminateOutcome::Graceful { exit_code } | TerminateOutcome::AlreadyExited { exit_code } => {
                *exit_code
            }
            TerminateOutcome::Killed => None,
        }
    }
}
