//! Test consumer shared by the worker and pool tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::consumer::{ConsumerFactory, MemoryQueue, QueueConsumer};

#[derive(Debug, Default)]
pub struct Stats {
    pub dequeued: Vec<u32>,
    pub attempts: HashMap<u32, u32>,
    pub finished: Vec<u32>,
    pub failed: Vec<u32>,
    pub task_length_calls: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum Behavior {
    #[default]
    Succeed,
    AlwaysFail,
    /// consume fails and the failure hook itself errors.
    FaultyFailHook,
    Slow(Duration),
    /// consume works, but the queue length cannot be read.
    BrokenLength,
    /// consume panics.
    Panic,
}

pub struct TestConsumer {
    pub queue: MemoryQueue<u32>,
    pub stats: Arc<Mutex<Stats>>,
    pub behavior: Behavior,
}

impl TestConsumer {
    pub fn new(queue: MemoryQueue<u32>, stats: Arc<Mutex<Stats>>, behavior: Behavior) -> Self {
        Self {
            queue,
            stats,
            behavior,
        }
    }
}

pub fn factory(
    queue: &MemoryQueue<u32>,
    stats: &Arc<Mutex<Stats>>,
    behavior: Behavior,
) -> ConsumerFactory<TestConsumer> {
    let queue = queue.clone();
    let stats = Arc::clone(stats);
    Arc::new(move || TestConsumer::new(queue.clone(), Arc::clone(&stats), behavior))
}

#[async_trait]
impl QueueConsumer for TestConsumer {
    type Item = u32;

    async fn task_length(&mut self) -> anyhow::Result<usize> {
        self.stats.lock().unwrap().task_length_calls += 1;
        if matches!(self.behavior, Behavior::BrokenLength) {
            anyhow::bail!("LLEN timed out");
        }
        Ok(self.queue.len())
    }

    async fn dequeue(&mut self) -> anyhow::Result<Option<u32>> {
        let item = self.queue.pop();
        if let Some(n) = item {
            self.stats.lock().unwrap().dequeued.push(n);
        }
        Ok(item)
    }

    async fn enqueue(&mut self, item: u32) -> anyhow::Result<()> {
        self.queue.push(item);
        Ok(())
    }

    async fn consume(&mut self, item: &u32) -> anyhow::Result<()> {
        *self.stats.lock().unwrap().attempts.entry(*item).or_default() += 1;
        match self.behavior {
            Behavior::Succeed | Behavior::BrokenLength => {}
            Behavior::Slow(d) => tokio::time::sleep(d).await,
            Behavior::Panic => panic!("consumer bug on {item}"),
            Behavior::AlwaysFail | Behavior::FaultyFailHook => {
                anyhow::bail!("cannot consume {item}")
            }
        }
        self.stats.lock().unwrap().finished.push(*item);
        Ok(())
    }

    async fn consume_fail(&mut self, item: &u32, _error: &anyhow::Error) -> anyhow::Result<()> {
        self.stats.lock().unwrap().failed.push(*item);
        if matches!(self.behavior, Behavior::FaultyFailHook) {
            anyhow::bail!("failure hook broke on {item}");
        }
        Ok(())
    }
}
