//! workpool: elastic master/worker pool that drains an external queue.

mod hooks;
mod retry;

pub mod config;
pub mod consumer;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod scaling;
pub mod spawn;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, PoolConfig, RetryBackoff};
pub use consumer::{ConsumerFactory, MemoryQueue, QueueConsumer};
pub use hooks::{ExitHook, ExitHooks};
pub use lifecycle::{
    CancellationToken, ProcessContext, Role, TerminateCause, WorkerExit, WorkerKind, WorkerState,
};
pub use logging::init_tracing;
pub use pool::{Exit, Pool, PoolBuilder, PoolError, PoolHandle, Shutdown};
pub use registry::{WorkerHandle, WorkerId};
pub use retry::{RetryExhausted, consume_with_retry};
pub use spawn::{
    PoolShared, SpawnError, SpawnedWorker, TaskSpawner, WorkerLaunch, WorkerSpawner,
    is_worker_process,
};
#[cfg(unix)]
pub use spawn::ProcessSpawner;
pub use worker::{WorkerReport, run_worker};
