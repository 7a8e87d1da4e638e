//! Worker spawn strategies.
//!
//! - **process**: re-execute the current binary as an isolated worker process
//! - **task**: run the worker loop as a tokio task inside the master's process
//!
//! Both hand back a [`SpawnedWorker`]: an id for the registry, a handle to request
//! termination, and a future that resolves when the worker has been reaped.

#[cfg(unix)]
mod process;
mod task;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::consumer::{ConsumerFactory, QueueConsumer};
use crate::hooks::ExitHooks;
use crate::lifecycle::{WorkerExit, WorkerKind};
use crate::registry::{WorkerHandle, WorkerId};

#[cfg(unix)]
pub use process::ProcessSpawner;
pub use task::TaskSpawner;

/// Environment variable through which a re-executed binary learns it is a worker.
pub const WORKER_ENV: &str = "WORKPOOL_WORKER";

/// What a new worker inherits from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLaunch {
    /// Identifier recorded by the master at pool start.
    pub master_id: u32,
    pub kind: WorkerKind,
}

impl WorkerLaunch {
    pub fn encode(&self) -> Result<String, SpawnError> {
        serde_json::to_string(self).map_err(|e| SpawnError::Launch(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, SpawnError> {
        serde_json::from_str(raw).map_err(|e| SpawnError::Launch(format!("{WORKER_ENV}: {e}")))
    }

    /// `Ok(None)` in the master, `Ok(Some(_))` in a re-executed worker.
    pub fn from_env() -> Result<Option<Self>, SpawnError> {
        match std::env::var(WORKER_ENV) {
            Ok(raw) => Self::decode(&raw).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(SpawnError::Launch(format!("{WORKER_ENV}: {e}"))),
        }
    }
}

/// True inside a worker process started by [`ProcessSpawner`].
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Pool-wide, immutable inputs every worker needs.
pub struct PoolShared<C: QueueConsumer> {
    pub config: Arc<PoolConfig>,
    pub factory: ConsumerFactory<C>,
    pub hooks: Arc<ExitHooks<C>>,
}

impl<C: QueueConsumer> Clone for PoolShared<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

pub struct SpawnedWorker {
    pub id: WorkerId,
    pub handle: WorkerHandle,
    /// Resolves once the worker is gone and reaped.
    pub exit: BoxFuture<'static, WorkerExit>,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("invalid worker launch: {0}")]
    Launch(String),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for different worker spawn strategies.
pub trait WorkerSpawner<C: QueueConsumer>: Send + Sync {
    /// Identifier the master records at start. Workers compare against it.
    fn master_id(&self) -> u32 {
        std::process::id()
    }

    fn spawn(
        &self,
        launch: &WorkerLaunch,
        shared: &PoolShared<C>,
    ) -> Result<SpawnedWorker, SpawnError>;
}
