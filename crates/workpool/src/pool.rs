//! Master process: spawn, scale, reap, shut down.
//!
//! The master is a single task driving a transition function over [`PoolEvent`]s. Signals,
//! worker exits and explicit terminate requests all arrive on one channel; a periodic
//! scaling check runs in between. Nothing the master does interrupts a worker mid-item.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::config::{ConfigError, PoolConfig};
use crate::consumer::{ConsumerFactory, QueueConsumer};
use crate::hooks::{ExitHook, ExitHooks};
use crate::lifecycle::{
    ParentProbe, PoolEvent, ProcessContext, TerminateCause, WorkerKind, forward_master_signals,
    watch_worker_signals,
};
use crate::registry::WorkerRegistry;
use crate::scaling::additional_workers;
use crate::spawn::{PoolShared, SpawnError, SpawnedWorker, WorkerLaunch, WorkerSpawner};
use crate::worker::{WorkerReport, run_worker};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to locate worker executable: {0}")]
    Executable(#[source] std::io::Error),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error(transparent)]
    Launch(#[from] SpawnError),
}

/// How the master finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shutdown {
    /// `exit_message` on a normal shutdown, the fault description on a fatal one.
    pub message: String,
    pub fatal: bool,
    /// Workers successfully spawned over the pool's lifetime.
    pub spawned: usize,
    pub peak_workers: usize,
}

/// What this process did, depending on its role.
#[derive(Debug)]
pub enum Exit {
    Master(Shutdown),
    Worker(WorkerReport),
}

impl Exit {
    /// Process exit status for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            Self::Master(shutdown) if shutdown.fatal => 1,
            Self::Master(_) => 0,
            Self::Worker(report) => report.status,
        }
    }
}

/// Requests shutdown of a running pool from outside the master task.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl PoolHandle {
    /// Same effect as SIGTERM to the master. Returns false if the pool is already gone.
    pub fn terminate(&self) -> bool {
        self.events
            .send(PoolEvent::TerminateRequested(TerminateCause::Requested))
            .is_ok()
    }
}

pub struct PoolBuilder<C: QueueConsumer> {
    config: PoolConfig,
    factory: ConsumerFactory<C>,
    hooks: ExitHooks<C>,
    spawner: Option<Arc<dyn WorkerSpawner<C>>>,
    handle_signals: bool,
}

impl<C: QueueConsumer> PoolBuilder<C> {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on_worker_exit(mut self, hook: impl Fn(&mut C, &ProcessContext) + Send + Sync + 'static) -> Self {
        self.hooks.on_worker_exit(Arc::new(hook) as ExitHook<C>);
        self
    }

    pub fn on_master_exit(mut self, hook: impl Fn(&mut C, &ProcessContext) + Send + Sync + 'static) -> Self {
        self.hooks.on_master_exit(Arc::new(hook) as ExitHook<C>);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner<C>>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Install OS signal handlers in the master. On by default.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn build(self) -> Result<Pool<C>, PoolError> {
        self.config.validate()?;

        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => default_spawner()?,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Pool {
            shared: PoolShared {
                config: Arc::new(self.config),
                factory: self.factory,
                hooks: Arc::new(self.hooks),
            },
            spawner,
            events_tx,
            events_rx,
            handle_signals: self.handle_signals,
        })
    }
}

#[cfg(unix)]
fn default_spawner<C: QueueConsumer>() -> Result<Arc<dyn WorkerSpawner<C>>, PoolError> {
    let spawner = crate::spawn::ProcessSpawner::current_exe().map_err(PoolError::Executable)?;
    Ok(Arc::new(spawner))
}

#[cfg(not(unix))]
fn default_spawner<C: QueueConsumer>() -> Result<Arc<dyn WorkerSpawner<C>>, PoolError> {
    Ok(Arc::new(crate::spawn::TaskSpawner::new()))
}

pub struct Pool<C: QueueConsumer> {
    shared: PoolShared<C>,
    spawner: Arc<dyn WorkerSpawner<C>>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    events_rx: mpsc::UnboundedReceiver<PoolEvent>,
    handle_signals: bool,
}

impl<C: QueueConsumer> Pool<C> {
    /// Each process (master and every worker) builds its own consumer from `factory`.
    pub fn builder(factory: impl Fn() -> C + Send + Sync + 'static) -> PoolBuilder<C> {
        PoolBuilder {
            config: PoolConfig::default(),
            factory: Arc::new(factory),
            hooks: ExitHooks::new(),
            spawner: None,
            handle_signals: true,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Entry point for both roles. A re-executed worker process runs the consume loop and
    /// returns its report; the launching process becomes the master.
    pub async fn run(self) -> Result<Exit, PoolError> {
        match WorkerLaunch::from_env()? {
            Some(launch) => Ok(Exit::Worker(self.run_worker_process(launch).await?)),
            None => Ok(Exit::Master(self.start().await?)),
        }
    }

    async fn run_worker_process(self, launch: WorkerLaunch) -> Result<WorkerReport, PoolError> {
        #[cfg(unix)]
        let parent = ParentProbe::Process;
        #[cfg(not(unix))]
        let parent = ParentProbe::None;

        let id = std::process::id();
        let ctx = ProcessContext::worker(id, launch.master_id, launch.kind, parent);
        let _signals = watch_worker_signals(ctx.stop_token().clone()).map_err(PoolError::Signals)?;

        let span = tracing::info_span!("worker", id, kind = %launch.kind);
        let mut consumer = (self.shared.factory)();
        let report = run_worker(&mut consumer, &ctx, &self.shared.config, &self.shared.hooks)
            .instrument(span)
            .await;
        Ok(report)
    }

    /// Run as master until terminated and every worker has been reaped.
    pub async fn start(self) -> Result<Shutdown, PoolError> {
        let master_id = self.spawner.master_id();
        let span = tracing::info_span!("master", pid = master_id);
        self.run_master(master_id).instrument(span).await
    }

    async fn run_master(self, master_id: u32) -> Result<Shutdown, PoolError> {
        let Pool {
            shared,
            spawner,
            events_tx,
            mut events_rx,
            handle_signals,
        } = self;

        let ctx = ProcessContext::master(master_id);
        let mut consumer = (shared.factory)();

        // Handlers go in before the first spawn so no signal can land unhandled.
        let signals = if handle_signals {
            Some(forward_master_signals(events_tx.clone()).map_err(PoolError::Signals)?)
        } else {
            None
        };

        let config = Arc::clone(&shared.config);
        let mut master = Master {
            ctx,
            shared,
            spawner,
            events: events_tx,
            registry: WorkerRegistry::new(),
            cause: None,
            spawned: 0,
        };

        tracing::info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "Master starting"
        );

        if master.spawn_workers(WorkerKind::Permanent, config.min_workers) == 0 {
            master.handle_event(PoolEvent::TerminateRequested(TerminateCause::Fault(
                "failed to spawn any worker".to_string(),
            )));
        }

        let mut check = tokio::time::interval_at(
            Instant::now() + config.scaling_check_interval,
            config.scaling_check_interval,
        );
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !(master.ctx.is_stopping() && master.registry.is_empty()) {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => master.handle_event(event),
                    None => break,
                },
                _ = check.tick(), if !master.ctx.is_stopping() => {
                    if let Err(cause) = master.check_pool(&mut consumer).await {
                        master.handle_event(PoolEvent::TerminateRequested(cause));
                    }
                }
            }
        }

        if let Some(signals) = signals {
            signals.abort();
        }

        master.shared.hooks.run_master_exit(&mut consumer, &master.ctx);

        let (message, fatal) = match master.cause {
            Some(TerminateCause::Fault(msg)) => (msg, true),
            _ => (config.exit_message.clone(), false),
        };
        tracing::info!(
            fatal,
            spawned = master.spawned,
            peak_workers = master.registry.peak(),
            "{message}"
        );

        Ok(Shutdown {
            message,
            fatal,
            spawned: master.spawned,
            peak_workers: master.registry.peak(),
        })
    }
}

/// State owned by the master task. Only it touches the registry.
struct Master<C: QueueConsumer> {
    ctx: ProcessContext,
    shared: PoolShared<C>,
    spawner: Arc<dyn WorkerSpawner<C>>,
    events: mpsc::UnboundedSender<PoolEvent>,
    registry: WorkerRegistry,
    cause: Option<TerminateCause>,
    spawned: usize,
}

impl<C: QueueConsumer> Master<C> {
    fn handle_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::TerminateRequested(cause) => {
                if self.ctx.is_stopping() {
                    tracing::debug!(%cause, "Already shutting down");
                    return;
                }
                if cause.is_fatal() {
                    tracing::error!(%cause, "Master fault, shutting down");
                } else {
                    tracing::info!(%cause, workers = self.registry.len(), "Shutting down");
                }
                self.ctx.request_stop();
                self.cause = Some(cause);
                let signalled = self.registry.terminate_all();
                tracing::debug!(signalled, "Terminate sent to workers");
            }
            PoolEvent::ChildExited { id, exit } => match self.registry.remove(id) {
                Some(entry) => {
                    let state = exit.final_state();
                    if exit.success() || self.ctx.is_stopping() {
                        tracing::info!(
                            worker_id = %id,
                            kind = %entry.kind,
                            code = ?exit.code,
                            signal = ?exit.signal,
                            state = state.as_str(),
                            "Worker reaped"
                        );
                    } else {
                        tracing::warn!(
                            worker_id = %id,
                            kind = %entry.kind,
                            code = ?exit.code,
                            signal = ?exit.signal,
                            state = state.as_str(),
                            uptime_ms = entry.spawned_at.elapsed().as_millis() as u64,
                            "Worker exited abnormally"
                        );
                    }
                }
                None => tracing::debug!(worker_id = %id, "Reaped unknown worker"),
            },
            PoolEvent::Other(signal) => {
                tracing::debug!(signal, "Ignoring signal");
            }
        }
    }

    /// One scaling tick: restore the permanent floor, then grow under queue pressure.
    async fn check_pool(&mut self, consumer: &mut C) -> Result<(), TerminateCause> {
        let min = self.shared.config.min_workers;
        let max = self.shared.config.max_workers;

        let live = self.registry.len();
        if live < min {
            tracing::info!(live, min, "Below minimum, spawning permanent workers");
            self.spawn_workers(WorkerKind::Permanent, min - live);
        }

        let Some(current) = NonZeroUsize::new(self.registry.len()) else {
            tracing::warn!("No live workers, retrying at next check");
            return Ok(());
        };
        if current.get() >= max {
            tracing::trace!(current, max, "At capacity");
            return Ok(());
        }

        let depth = consumer
            .task_length()
            .await
            .map_err(|e| TerminateCause::Fault(format!("failed to read queue length: {e}")))?;

        let extra = additional_workers(current, depth, max).min(max - current.get());
        if extra > 0 {
            tracing::info!(current, depth, extra, "Queue backlog, adding elastic workers");
            self.spawn_workers(WorkerKind::Elastic, extra);
        } else {
            tracing::trace!(current, depth, "Queue under control");
        }
        Ok(())
    }

    /// Spawn up to `count` workers. Returns how many actually started.
    fn spawn_workers(&mut self, kind: WorkerKind, count: usize) -> usize {
        (0..count).filter(|_| self.spawn_with_retry(kind)).count()
    }

    fn spawn_with_retry(&mut self, kind: WorkerKind) -> bool {
        let launch = WorkerLaunch {
            master_id: self.ctx.id(),
            kind,
        };
        let attempts = self.shared.config.spawn_attempts;

        for attempt in 1..=attempts {
            match self.spawner.spawn(&launch, &self.shared) {
                Ok(worker) => {
                    self.register(kind, worker);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(%kind, attempt, attempts, error = %e, "Worker spawn failed");
                }
            }
        }
        tracing::error!(%kind, attempts, "Giving up on worker spawn");
        false
    }

    fn register(&mut self, kind: WorkerKind, worker: SpawnedWorker) {
        let SpawnedWorker { id, handle, exit } = worker;
        self.registry.insert(id, kind, handle);
        self.spawned += 1;
        tracing::debug!(worker_id = %id, %kind, live = self.registry.len(), "Worker spawned");

        let events = self.events.clone();
        tokio::spawn(exit.map(move |exit| {
            let _ = events.send(PoolEvent::ChildExited { id, exit });
        }));
    }
}
