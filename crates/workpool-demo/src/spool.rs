//! Directory-backed FIFO queue, safe to share between processes.
//!
//! Layout under the spool root:
//! - `staging/` - tasks being written
//! - `ready/` - one JSON file per pending task, named `{enqueued_nanos}-{id}.json`
//! - `claimed/` - tasks a consumer has taken but not yet parsed
//!
//! A rename within one filesystem is atomic, so moving a file out of `ready/` is the claim:
//! exactly one process wins it, the others see `NotFound` and move on.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub payload: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(payload: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    fn file_name(&self) -> String {
        let nanos = self.enqueued_at.timestamp_nanos_opt().unwrap_or_default();
        format!("{nanos:020}-{}.json", self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Spool {
    staging: PathBuf,
    ready: PathBuf,
    claimed: PathBuf,
}

impl Spool {
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let spool = Self {
            staging: root.join("staging"),
            ready: root.join("ready"),
            claimed: root.join("claimed"),
        };
        for dir in [&spool.staging, &spool.ready, &spool.claimed] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(spool)
    }

    pub async fn push(&self, task: &Task) -> anyhow::Result<()> {
        let name = task.file_name();
        let staged = self.staging.join(&name);
        tokio::fs::write(&staged, serde_json::to_vec(task)?)
            .await
            .with_context(|| format!("failed to stage {}", staged.display()))?;
        tokio::fs::rename(&staged, self.ready.join(&name)).await?;
        Ok(())
    }

    pub async fn len(&self) -> io::Result<usize> {
        Ok(self.ready_names().await?.len())
    }

    /// Claim the oldest ready task. `Ok(None)` when nothing is left to claim.
    ///
    /// A task file that does not parse stays in `claimed/` and is reported as an error.
    pub async fn pop(&self) -> anyhow::Result<Option<Task>> {
        for name in self.ready_names().await? {
            let claimed = self.claimed.join(&name);
            match tokio::fs::rename(self.ready.join(&name), &claimed).await {
                Ok(()) => {
                    let bytes = tokio::fs::read(&claimed).await?;
                    let task: Task = serde_json::from_slice(&bytes)
                        .with_context(|| format!("corrupt task file {}", claimed.display()))?;
                    tokio::fs::remove_file(&claimed).await?;
                    return Ok(Some(task));
                }
                // another consumer got there first
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn ready_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.ready).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && name.ends_with(".json")
            {
                names.push(name.to_string());
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(dir.path()).await.unwrap();

        for payload in 0..5 {
            spool.push(&Task::new(payload)).await.unwrap();
            // distinct timestamps
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(spool.len().await.unwrap(), 5);

        let mut seen = Vec::new();
        while let Some(task) = spool.pop().await.unwrap() {
            seen.push(task.payload);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(spool.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_spool_pops_none() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(dir.path()).await.unwrap();
        assert!(spool.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_consumers_claim_each_task_once() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(dir.path()).await.unwrap();
        for payload in 0..60 {
            spool.push(&Task::new(payload)).await.unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let spool = Spool::open(dir.path()).await.unwrap();
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(task) = spool.pop().await.unwrap() {
                    got.push(task.payload);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        assert_eq!(all.len(), 60);
        let unique: HashSet<_> = all.into_iter().collect();
        assert_eq!(unique, (0..60).collect());
    }

    #[tokio::test]
    async fn corrupt_task_is_kept_for_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("ready/0-bad.json"), b"{not json").unwrap();

        let err = spool.pop().await.unwrap_err();
        assert!(err.to_string().contains("corrupt task file"));
        assert!(dir.path().join("claimed/0-bad.json").exists());
        assert_eq!(spool.len().await.unwrap(), 0);
    }

    #[test]
    fn task_file_names_sort_by_enqueue_time() {
        let mut early = Task::new(1);
        let mut late = Task::new(2);
        early.enqueued_at = DateTime::from_timestamp(1_000, 0).unwrap();
        late.enqueued_at = DateTime::from_timestamp(20_000, 0).unwrap();
        assert!(early.file_name() < late.file_name());
    }
}
