//! Exit callbacks registered by the embedding application.
//!
//! Two ordered lists, one per role. Each runs once, in registration order, when its role
//! reaches its terminal transition. The lists are frozen once the pool is built.

use std::sync::Arc;

use crate::consumer::QueueConsumer;
use crate::lifecycle::ProcessContext;

/// Receives this process's consumer (to close connections) and its context.
pub type ExitHook<C> = Arc<dyn Fn(&mut C, &ProcessContext) + Send + Sync>;

pub struct ExitHooks<C: QueueConsumer> {
    master: Vec<ExitHook<C>>,
    worker: Vec<ExitHook<C>>,
}

impl<C: QueueConsumer> Default for ExitHooks<C> {
    fn default() -> Self {
        Self {
            master: Vec::new(),
            worker: Vec::new(),
        }
    }
}

impl<C: QueueConsumer> ExitHooks<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_master_exit(&mut self, hook: ExitHook<C>) {
        self.master.push(hook);
    }

    pub fn on_worker_exit(&mut self, hook: ExitHook<C>) {
        self.worker.push(hook);
    }

    pub fn run_master_exit(&self, consumer: &mut C, ctx: &ProcessContext) {
        tracing::debug!(hooks = self.master.len(), "Running master exit hooks");
        for hook in &self.master {
            hook(consumer, ctx);
        }
    }

    pub fn run_worker_exit(&self, consumer: &mut C, ctx: &ProcessContext) {
        tracing::debug!(hooks = self.worker.len(), "Running worker exit hooks");
        for hook in &self.worker {
            hook(consumer, ctx);
        }
    }

    pub fn master_len(&self) -> usize {
        self.master.len()
    }

    pub fn worker_len(&self) -> usize {
        self.worker.len()
    }
}
