//! Worker runtime - the per-worker consume loop.
//!
//! The same loop runs in a re-executed worker process and in an in-process worker task.
//! One item at a time, in dequeue order:
//! 1. stop flag set → leave
//! 2. idle past `max_idle_loops` and the master is gone → leave
//! 3. dequeue; consume with retry, or sleep when the queue is empty
//!
//! Permanent workers loop until stopped; elastic workers also leave once they have seen
//! more than `max_idle_loops` consecutive empty dequeues.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::consumer::QueueConsumer;
use crate::hooks::ExitHooks;
use crate::lifecycle::{ProcessContext, WorkerState};
use crate::retry::consume_with_retry;

/// Clean exit: the last iteration raised nothing.
pub const EXIT_OK: i32 = 0;
/// The last iteration failed to talk to the queue backend.
pub const EXIT_QUEUE_ERROR: i32 = 1;
/// A runtime fault (the failure hook raised) stopped the worker.
pub const EXIT_FAULT: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Process exit status.
    pub status: i32,
    pub finished: u64,
    pub failed: u64,
    /// State of the last loop iteration before the worker left its loop.
    pub last_state: WorkerState,
}

/// Run the consume loop until stopped, idle-expired, or orphaned, then run the
/// worker-exit hooks.
pub async fn run_worker<C: QueueConsumer>(
    consumer: &mut C,
    ctx: &ProcessContext,
    config: &PoolConfig,
    hooks: &ExitHooks<C>,
) -> WorkerReport {
    let auto_quit = ctx.auto_quit();
    let stop = ctx.stop_token();

    let mut state = WorkerState::Idle;
    let mut idle_loops: u64 = 0;
    let mut status = EXIT_OK;
    let mut finished = 0u64;
    let mut failed = 0u64;

    tracing::info!(auto_quit, master_id = ctx.master_id(), "Worker started");

    if !config.startup_delay.is_zero() {
        pause(stop, config.startup_delay).await;
    }

    while !auto_quit || idle_loops <= config.max_idle_loops {
        if stop.is_cancelled() {
            tracing::debug!("Stop flag set, leaving loop");
            break;
        }

        if state == WorkerState::Idle && idle_loops > config.max_idle_loops && ctx.is_orphaned() {
            tracing::warn!(master_id = ctx.master_id(), idle_loops, "Master is gone, worker exiting");
            break;
        }

        match consumer.dequeue().await {
            Ok(Some(item)) => {
                idle_loops = 1;
                state = WorkerState::Working;
                tracing::trace!(item = ?item, state = state.as_str(), "Item dequeued");

                match consume_with_retry(
                    consumer,
                    &item,
                    config.max_consume_retries,
                    config.retry_backoff.as_ref(),
                )
                .await
                {
                    Ok(attempts) => {
                        state = WorkerState::Finished;
                        finished += 1;
                        status = EXIT_OK;
                        tracing::trace!(item = ?item, attempts, state = state.as_str(), "Item finished");
                    }
                    Err(exhausted) => {
                        state = WorkerState::Fail;
                        failed += 1;
                        tracing::warn!(
                            item = ?item,
                            attempts = exhausted.attempts,
                            state = state.as_str(),
                            error = %exhausted.last_error,
                            "Consume retries exhausted"
                        );
                        match consumer.consume_fail(&item, &exhausted.last_error).await {
                            Ok(()) => status = EXIT_OK,
                            Err(e) => {
                                tracing::error!(item = ?item, error = %e, "Failure hook raised, stopping worker");
                                status = EXIT_FAULT;
                                ctx.request_stop();
                            }
                        }
                    }
                }
            }
            Ok(None) => {
                state = WorkerState::Idle;
                idle_loops = idle_loops.saturating_add(1);
                status = EXIT_OK;
                pause(stop, config.idle_poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Dequeue failed");
                status = EXIT_QUEUE_ERROR;
                pause(stop, config.idle_poll_interval).await;
            }
        }
    }

    hooks.run_worker_exit(consumer, ctx);
    tracing::info!(status, finished, failed, last_state = state.as_str(), "Worker exiting");

    WorkerReport {
        status,
        finished,
        failed,
        last_state: state,
    }
}

/// Sleep that ends early once the stop flag is set. Only used between items.
async fn pause(stop: &CancellationToken, duration: Duration) {
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
