//! Process workers: re-execute the current binary with a worker launch in the environment.
//!
//! The child runs the embedding application's `main` again; `Pool::run` sees
//! `WORKPOOL_WORKER`, skips the master path, and enters the worker loop with fresh
//! per-process state. Nothing is inherited except the launch record.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use futures::FutureExt;
use nix::unistd::Pid;
use tokio::process::Command;

use super::{PoolShared, SpawnError, SpawnedWorker, WORKER_ENV, WorkerLaunch, WorkerSpawner};
use crate::consumer::QueueConsumer;
use crate::lifecycle::WorkerExit;
use crate::registry::{WorkerHandle, WorkerId};

pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = OsString>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Spawn workers as copies of this executable with the same arguments.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            std::env::args_os().skip(1),
        ))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl<C: QueueConsumer> WorkerSpawner<C> for ProcessSpawner {
    fn spawn(
        &self,
        launch: &WorkerLaunch,
        _shared: &PoolShared<C>,
    ) -> Result<SpawnedWorker, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV, launch.encode()?)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| SpawnError::Other("worker exited before its pid was read".to_string()))?;

        let exit = async move {
            match child.wait().await {
                Ok(status) => WorkerExit::from(status),
                Err(e) => {
                    tracing::error!(worker_id = pid, error = %e, "Failed to wait for worker process");
                    WorkerExit::unknown()
                }
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            id: WorkerId(pid),
            handle: WorkerHandle::Process(Pid::from_raw(pid as i32)),
            exit,
        })
    }
}
