//! The collaborator boundary between the pool and the embedding application.
//!
//! The application supplies a [`QueueConsumer`]: queue depth, dequeue/enqueue, and the work
//! for one item. Every master and every worker builds its own instance through a
//! [`ConsumerFactory`], after the spawn boundary, so connections are never shared.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

/// Application-side queue and work definition.
///
/// Implementations should open their queue connection lazily on first use and release it in
/// a worker-exit / master-exit hook.
#[async_trait]
pub trait QueueConsumer: Send + 'static {
    type Item: fmt::Debug + Send + Sync;

    /// Pending item count. Called by the master on every scaling tick.
    async fn task_length(&mut self) -> anyhow::Result<usize>;

    /// Atomically remove one item. Must not block when the queue is empty.
    async fn dequeue(&mut self) -> anyhow::Result<Option<Self::Item>>;

    /// Atomically append one item. Used by producers, never by the pool itself.
    async fn enqueue(&mut self, item: Self::Item) -> anyhow::Result<()>;

    /// Process one item. Failure is signalled by returning an error; the pool retries.
    async fn consume(&mut self, item: &Self::Item) -> anyhow::Result<()>;

    /// Called once for an item whose consume attempts were all exhausted.
    ///
    /// An error returned here is treated as a runtime fault: the worker stops after the
    /// current iteration.
    async fn consume_fail(&mut self, item: &Self::Item, error: &anyhow::Error) -> anyhow::Result<()> {
        tracing::error!(item = ?item, error = %error, "Consume attempts exhausted, item dropped");
        Ok(())
    }
}

/// Builds one consumer per process (or per in-process worker task).
pub type ConsumerFactory<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// In-process FIFO queue.
///
/// Cloning yields another handle to the same queue, which gives atomic dequeue semantics
/// between tokio-task workers. Not shared across OS processes.
pub struct MemoryQueue<T> {
    items: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for MemoryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items.into_iter().collect())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Memory queue mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = MemoryQueue::from_items([1, 2, 3]);
        queue.push(4);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(4));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_items() {
        let queue = MemoryQueue::new();
        let other = queue.clone();
        queue.push("a");
        assert_eq!(other.pop(), Some("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_pops_deliver_each_item_once() {
        let queue = MemoryQueue::from_items(0..1000);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(n) = q.pop() {
                        got.push(n);
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
