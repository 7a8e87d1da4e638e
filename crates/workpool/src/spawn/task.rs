//! In-process workers: the worker loop as a tokio task.
//!
//! Ids are synthetic (master `0`, workers from `1`). Terminate cancels the worker's own
//! token, reaping awaits its `JoinHandle`, and the orphan probe is a weak reference to an
//! anchor owned by this spawner, which the master holds for its whole lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{PoolShared, SpawnError, SpawnedWorker, WorkerLaunch, WorkerSpawner};
use crate::consumer::QueueConsumer;
use crate::lifecycle::{ParentProbe, ProcessContext, WorkerExit};
use crate::registry::{WorkerHandle, WorkerId};
use crate::worker::run_worker;

pub struct TaskSpawner {
    next_id: AtomicU32,
    anchor: Arc<()>,
}

impl Default for TaskSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSpawner {
    pub const MASTER_ID: u32 = 0;

    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(Self::MASTER_ID + 1),
            anchor: Arc::new(()),
        }
    }
}

impl<C: QueueConsumer> WorkerSpawner<C> for TaskSpawner {
    fn master_id(&self) -> u32 {
        Self::MASTER_ID
    }

    fn spawn(
        &self,
        launch: &WorkerLaunch,
        shared: &PoolShared<C>,
    ) -> Result<SpawnedWorker, SpawnError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SpawnError::Other(format!("no tokio runtime: {e}")))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();
        let ctx = ProcessContext::worker(
            id,
            launch.master_id,
            launch.kind,
            ParentProbe::Anchor(Arc::downgrade(&self.anchor)),
        )
        .with_stop(stop.clone());

        let shared = shared.clone();
        let span = tracing::info_span!("worker", id, kind = %launch.kind);
        let join = runtime.spawn(
            async move {
                let mut consumer = (shared.factory)();
                run_worker(&mut consumer, &ctx, &shared.config, &shared.hooks)
                    .await
                    .status
            }
            .instrument(span),
        );

        let exit = async move {
            match join.await {
                Ok(status) => WorkerExit::code(status),
                Err(e) if e.is_panic() => {
                    tracing::error!(worker_id = id, "Worker task panicked");
                    WorkerExit::panicked()
                }
                Err(_) => WorkerExit::unknown(),
            }
        }
        .boxed();

        Ok(SpawnedWorker {
            id: WorkerId(id),
            handle: WorkerHandle::Task(stop),
            exit,
        })
    }
}
