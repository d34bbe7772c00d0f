//! Forks worker processes on this machine and waits for them.
mod command;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult, DistributedError, ValidationError};
use crate::runner::sleep_until_opt;
use crate::shutdown::ShutdownReceiver;
use crate::transport::{WireMessage, decode_line};

pub use command::worker_command_args;

/// How long every child gets to report ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit-code offset for a child killed by a signal.
const SIGNAL_EXIT_BASE: i32 = 128;

#[derive(Debug)]
enum ChildEvent {
    Ready { pid: u32 },
    Exited { pid: u32, status: ExitStatus },
    WaitFailed { pid: u32, err: std::io::Error },
}

/// Combines the exit statuses of every child into one exit code.
///
/// The first non-zero exit code wins. A child killed by a signal the
/// supervisor did not send reports `128 + signal`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExitTally {
    failure: Option<i32>,
}

impl ExitTally {
    pub fn record(&mut self, code: Option<i32>, signal: Option<i32>, requested: bool) {
        if self.failure.is_some() {
            return;
        }
        self.failure = match (code, signal) {
            (Some(0), _) => None,
            (Some(code), _) => Some(code),
            (None, Some(signal)) if !requested => Some(SIGNAL_EXIT_BASE.saturating_add(signal)),
            (None, Some(_) | None) => None,
        };
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.failure.unwrap_or(0)
    }

    #[must_use]
    pub const fn has_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Starts `count` copies of a worker command and tracks them until they exit.
pub struct ProcessSupervisor {
    program: PathBuf,
    args: Vec<OsString>,
    count: usize,
    ready_timeout: Duration,
}

impl ProcessSupervisor {
    #[must_use]
    pub const fn new(program: PathBuf, args: Vec<OsString>, count: usize) -> Self {
        Self {
            program,
            args,
            count,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Supervisor for the running binary.
    ///
    /// # Errors
    ///
    /// Returns an error when the path of the running executable is unknown.
    pub fn for_current_exe(args: Vec<OsString>, count: usize) -> AppResult<Self> {
        let program = std::env::current_exe()
            .map_err(|err| AppError::validation(ValidationError::CurrentExe { source: err }))?;
        Ok(Self::new(program, args, count))
    }

    /// Runs the children to completion and returns the combined exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when a child cannot be started, exits before it
    /// reports ready, or the children are not ready in time.
    pub async fn run(self, mut shutdown_rx: ShutdownReceiver) -> AppResult<i32> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut pids = Vec::with_capacity(self.count);
        for _ in 0..self.count {
            match self.spawn_child(&events_tx) {
                Ok(pid) => pids.push(pid),
                Err(err) => {
                    terminate_all(&pids);
                    return Err(err);
                }
            }
        }
        drop(events_tx);
        info!("Started {} worker processes", pids.len());

        let ready_deadline = Instant::now().checked_add(self.ready_timeout);
        let mut ready: BTreeSet<u32> = BTreeSet::new();
        let mut next_index: u64 = 0;
        let mut remaining = pids.len();
        let mut requested = false;
        let mut tally = ExitTally::default();
        let mut failure: Option<AppError> = None;

        while remaining > 0 {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match event {
                        ChildEvent::Ready { pid } => {
                            if ready.insert(pid) {
                                info!(
                                    "Worker process {} (index {}) reported as ready",
                                    pid, next_index
                                );
                                next_index = next_index.saturating_add(1);
                                if ready.len() == pids.len() {
                                    info!("All {} worker processes ready", ready.len());
                                }
                            }
                        }
                        ChildEvent::Exited { pid, status } => {
                            remaining = remaining.saturating_sub(1);
                            debug!("Worker process {} exited ({})", pid, status);
                            tally.record(status.code(), terminating_signal(status), requested);
                            if !ready.contains(&pid) && !requested {
                                warn!(
                                    "Worker process {} exited before reporting ready ({})",
                                    pid, status
                                );
                                if !tally.has_failure() && failure.is_none() {
                                    failure = Some(AppError::distributed(
                                        DistributedError::ChildExitedBeforeReady {
                                            pid,
                                            status: status.to_string(),
                                        },
                                    ));
                                }
                                requested = true;
                                terminate_all(&pids);
                            }
                        }
                        ChildEvent::WaitFailed { pid, err } => {
                            remaining = remaining.saturating_sub(1);
                            error!("Failed to wait for worker process {}: {}", pid, err);
                        }
                    }
                }
                () = sleep_until_opt(ready_deadline), if ready.len() < pids.len() && !requested => {
                    failure = Some(AppError::distributed(DistributedError::ChildReadyTimeout {
                        expected: pids.len(),
                        actual: ready.len(),
                    }));
                    requested = true;
                    terminate_all(&pids);
                }
                _ = shutdown_rx.recv(), if !requested => {
                    info!("Forwarding shutdown to {} worker processes", remaining);
                    requested = true;
                    terminate_all(&pids);
                }
            }
        }

        if tally.has_failure() {
            return Ok(tally.exit_code());
        }
        failure.map_or_else(|| Ok(tally.exit_code()), Err)
    }

    fn spawn_child(&self, events_tx: &mpsc::UnboundedSender<ChildEvent>) -> AppResult<u32> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::distributed(DistributedError::SpawnChild { source: err }))?;
        let pid = child.id().unwrap_or(0);
        debug!("Started worker process {}", pid);

        let stdout = child.stdout.take();
        tokio::spawn(watch_child(pid, child, stdout, events_tx.clone()));
        Ok(pid)
    }
}

/// Reads a child's stdout: its ready line becomes an event, the rest is
/// passed through to our stdout.
async fn forward_stdout(pid: u32, stdout: ChildStdout, events_tx: &mpsc::UnboundedSender<ChildEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut out = tokio::io::stdout();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!("Stopped reading output of worker process {}: {}", pid, err);
                break;
            }
        };
        if let Ok(WireMessage::Ready(ready)) = decode_line(line.as_bytes()) {
            debug!("Worker process {} sent ready (pid {})", pid, ready.pid);
            if events_tx.send(ChildEvent::Ready { pid }).is_err() {
                break;
            }
            continue;
        }
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if out.write_all(&bytes).await.is_err() {
            break;
        }
    }
    if let Err(err) = out.flush().await {
        debug!("Failed to flush forwarded output: {}", err);
    }
}

/// Reports the child's exit once its output is drained, so a ready line is
/// always seen before the exit.
async fn watch_child(
    pid: u32,
    mut child: Child,
    stdout: Option<ChildStdout>,
    events_tx: mpsc::UnboundedSender<ChildEvent>,
) {
    let forward = async {
        if let Some(stdout) = stdout {
            forward_stdout(pid, stdout, &events_tx).await;
        }
    };
    let (status, ()) = tokio::join!(child.wait(), forward);
    let event = match status {
        Ok(status) => ChildEvent::Exited { pid, status },
        Err(err) => ChildEvent::WaitFailed { pid, err },
    };
    if events_tx.send(event).is_err() {
        debug!("Supervisor gone before worker process {} exited", pid);
    }
}

#[cfg(unix)]
fn terminate_all(pids: &[u32]) {
    for pid in pids {
        let Ok(raw) = libc::pid_t::try_from(*pid) else {
            continue;
        };
        if raw <= 0 {
            continue;
        }
        // Safety: kill only sends a signal to a pid we spawned; it touches no memory.
        let result = unsafe { libc::kill(raw, libc::SIGTERM) };
        if result != 0 {
            debug!("Failed to signal worker process {}", pid);
        }
    }
}

#[cfg(not(unix))]
fn terminate_all(pids: &[u32]) {
    debug!("Signal forwarding unsupported; {} children left running", pids.len());
}

#[cfg(unix)]
fn terminating_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
const fn terminating_signal(_status: ExitStatus) -> Option<i32> {
    None
}
