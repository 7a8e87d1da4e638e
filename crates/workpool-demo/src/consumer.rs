use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use workpool::QueueConsumer;

use crate::spool::{Spool, Task};

/// Simulated work per task.
const WORK_TIME: Duration = Duration::from_millis(5);

/// Consumes spool tasks. The spool is opened on first use, per process.
pub struct SpoolConsumer {
    root: PathBuf,
    spool: Option<Spool>,
    /// Reject every task whose payload is a multiple of 3, to exercise retry and failure.
    fail: bool,
}

impl SpoolConsumer {
    pub fn new(root: impl Into<PathBuf>, fail: bool) -> Self {
        Self {
            root: root.into(),
            spool: None,
            fail,
        }
    }

    async fn spool(&mut self) -> anyhow::Result<&Spool> {
        if self.spool.is_none() {
            self.spool = Some(Spool::open(&self.root).await?);
            tracing::debug!(root = %self.root.display(), "Spool opened");
        }
        self.spool
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("spool unavailable"))
    }

    /// Drop the open spool handle. Returns true if one was open.
    pub fn close(&mut self) -> bool {
        self.spool.take().is_some()
    }
}

#[async_trait]
impl QueueConsumer for SpoolConsumer {
    type Item = Task;

    async fn task_length(&mut self) -> anyhow::Result<usize> {
        Ok(self.spool().await?.len().await?)
    }

    async fn dequeue(&mut self) -> anyhow::Result<Option<Task>> {
        self.spool().await?.pop().await
    }

    async fn enqueue(&mut self, task: Task) -> anyhow::Result<()> {
        self.spool().await?.push(&task).await
    }

    async fn consume(&mut self, task: &Task) -> anyhow::Result<()> {
        if self.fail && task.payload % 3 == 0 {
            anyhow::bail!("task {} rejected", task.payload);
        }
        tokio::time::sleep(WORK_TIME).await;
        let waited_ms = (Utc::now() - task.enqueued_at).num_milliseconds();
        tracing::info!(task_id = %task.id, payload = task.payload, waited_ms, "Task consumed");
        Ok(())
    }

    async fn consume_fail(&mut self, task: &Task, error: &anyhow::Error) -> anyhow::Result<()> {
        tracing::warn!(task_id = %task.id, payload = task.payload, %error, "Task dropped after retries");
        Ok(())
    }
}
