//! Elastic scaling policy.
//!
//! Growth happens only under sustained queue pressure; the pool never shrinks proactively.
//! Elastic workers shrink it passively by exiting after `max_idle_loops` empty dequeues.

use std::num::NonZeroUsize;

/// Queue-depth-per-worker ratio below which the pool is considered keeping up.
pub const PRESSURE_RATIO: usize = 3;
/// Absolute backlog (depth minus workers) below which the pool is considered keeping up.
pub const PRESSURE_BACKLOG: usize = 10;

/// Number of elastic workers to add for the observed queue depth.
///
/// Returns 0 when `depth / current < 3` and `depth - current < 10`. Otherwise returns
/// half of the remaining headroom, rounded up: `ceil((max - current) / 2)`. The result never
/// exceeds `max - current`, and is 0 once the pool is at or above `max`.
pub fn additional_workers(current: NonZeroUsize, queue_depth: usize, max_workers: usize) -> usize {
    let current = current.get();

    // depth / current < 3, without the float division
    let low_ratio = queue_depth < current.saturating_mul(PRESSURE_RATIO);
    let low_backlog = queue_depth.saturating_sub(current) < PRESSURE_BACKLOG;
    if low_ratio && low_backlog {
        return 0;
    }

    max_workers.saturating_sub(current).div_ceil(2)
}
