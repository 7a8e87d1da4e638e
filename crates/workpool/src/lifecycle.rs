//! Per-process lifecycle state shared by both roles.
//!
//! Each master and worker carries one [`ProcessContext`]: its own identifier, the master
//! identifier recorded at pool start, and a stop flag. OS signals are turned into
//! [`PoolEvent`]s (master) or a cancelled stop flag (worker); nothing here interrupts an
//! in-flight consume call.

use std::fmt;
use std::io;
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
pub use tokio_util::sync::CancellationToken;

use crate::registry::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanent workers stay for the pool's lifetime; elastic workers exit once idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Permanent,
    Elastic,
}

impl WorkerKind {
    pub fn auto_quit(&self) -> bool {
        matches!(self, Self::Elastic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Elastic => "elastic",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker-local state, updated once per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Working,
    Finished,
    Fail,
    Exiting,
    /// Killed by a signal instead of leaving its loop.
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Finished => "finished",
            Self::Fail => "fail",
            Self::Exiting => "exiting",
            Self::Terminated => "terminated",
        }
    }
}

/// How a worker can tell that its master is gone.
pub enum ParentProbe {
    /// The master never has a parent to check.
    None,
    /// OS process worker: the live parent pid must still equal the recorded master id.
    #[cfg(unix)]
    Process,
    /// In-process worker: the master's liveness anchor must still be alive.
    Anchor(Weak<()>),
}

impl fmt::Debug for ParentProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            #[cfg(unix)]
            Self::Process => f.write_str("Process"),
            Self::Anchor(_) => f.write_str("Anchor"),
        }
    }
}

/// Explicit per-process runtime context.
#[derive(Debug)]
pub struct ProcessContext {
    id: u32,
    master_id: u32,
    kind: Option<WorkerKind>,
    stop: CancellationToken,
    parent: ParentProbe,
}

impl ProcessContext {
    pub fn master(id: u32) -> Self {
        Self {
            id,
            master_id: id,
            kind: None,
            stop: CancellationToken::new(),
            parent: ParentProbe::None,
        }
    }

    pub fn worker(id: u32, master_id: u32, kind: WorkerKind, parent: ParentProbe) -> Self {
        Self {
            id,
            master_id,
            kind: Some(kind),
            stop: CancellationToken::new(),
            parent,
        }
    }

    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn master_id(&self) -> u32 {
        self.master_id
    }

    /// Derived, never stored: master iff our id is the recorded master id.
    pub fn role(&self) -> Role {
        if self.id == self.master_id {
            Role::Master
        } else {
            Role::Worker
        }
    }

    pub fn is_master(&self) -> bool {
        self.role() == Role::Master
    }

    pub fn kind(&self) -> Option<WorkerKind> {
        self.kind
    }

    pub fn auto_quit(&self) -> bool {
        self.kind.is_some_and(|k| k.auto_quit())
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// True when the master that spawned us is no longer our live parent.
    pub fn is_orphaned(&self) -> bool {
        match &self.parent {
            ParentProbe::None => false,
            #[cfg(unix)]
            ParentProbe::Process => {
                nix::unistd::getppid().as_raw() as u32 != self.master_id
            }
            ParentProbe::Anchor(anchor) => anchor.upgrade().is_none(),
        }
    }
}

/// How a worker ended, as seen by the master when it is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Exit status reported for an in-process worker that panicked.
pub const PANIC_EXIT_CODE: i32 = 101;

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn panicked() -> Self {
        Self::code(PANIC_EXIT_CODE)
    }

    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn final_state(&self) -> WorkerState {
        if self.signal.is_some() {
            WorkerState::Terminated
        } else {
            WorkerState::Exiting
        }
    }
}

#[cfg(unix)]
impl From<std::process::ExitStatus> for WorkerExit {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// Why the master is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateCause {
    Signal(&'static str),
    /// Explicit request through a `PoolHandle`.
    Requested,
    /// Unrecoverable error inside the master; the message becomes the exit message.
    Fault(String),
}

impl TerminateCause {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

impl fmt::Display for TerminateCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::Requested => f.write_str("shutdown requested"),
            Self::Fault(msg) => write!(f, "fault: {msg}"),
        }
    }
}

/// Inputs to the master's transition function.
#[derive(Debug)]
pub enum PoolEvent {
    TerminateRequested(TerminateCause),
    ChildExited { id: WorkerId, exit: WorkerExit },
    /// A signal with no pool meaning; handled by the no-op default.
    Other(&'static str),
}

/// Forward master-relevant OS signals into the pool's event channel.
///
/// SIGTERM, SIGINT and SIGQUIT request termination. SIGHUP, SIGUSR1 and SIGUSR2 are
/// forwarded as [`PoolEvent::Other`].
#[cfg(unix)]
pub fn forward_master_signals(
    events: mpsc::UnboundedSender<PoolEvent>,
) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = term.recv() => PoolEvent::TerminateRequested(TerminateCause::Signal("SIGTERM")),
                Some(()) = int.recv() => PoolEvent::TerminateRequested(TerminateCause::Signal("SIGINT")),
                Some(()) = quit.recv() => PoolEvent::TerminateRequested(TerminateCause::Signal("SIGQUIT")),
                Some(()) = hup.recv() => PoolEvent::Other("SIGHUP"),
                Some(()) = usr1.recv() => PoolEvent::Other("SIGUSR1"),
                Some(()) = usr2.recv() => PoolEvent::Other("SIGUSR2"),
                else => break,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn forward_master_signals(
    events: mpsc::UnboundedSender<PoolEvent>,
) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let event = PoolEvent::TerminateRequested(TerminateCause::Signal("CTRL_C"));
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}

/// Turn terminate signals into a cancelled stop flag for a worker process.
///
/// The in-flight consume call is never interrupted; the worker notices the flag at the top
/// of its next iteration.
#[cfg(unix)]
pub fn watch_worker_signals(stop: CancellationToken) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = stop.cancelled() => return,
            Some(()) = term.recv() => "SIGTERM",
            Some(()) = int.recv() => "SIGINT",
            Some(()) = quit.recv() => "SIGQUIT",
            else => return,
        };
        tracing::info!(signal = name, "Stop requested, finishing current item");
        stop.cancel();
    }))
}

#[cfg(not(unix))]
pub fn watch_worker_signals(stop: CancellationToken) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = stop.cancelled() => {}
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!(signal = "CTRL_C", "Stop requested, finishing current item");
                stop.cancel();
            }
        }
    }))
}
