//! Bounded retry around a single consume call.

use crate::config::RetryBackoff;
use crate::consumer::QueueConsumer;

/// Every consume attempt for an item failed.
#[derive(Debug, thiserror::Error)]
#[error("consume failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last_error: anyhow::Error,
}

/// Run `consume` up to `max_attempts` times.
///
/// The first attempt that returns `Ok` ends the loop and its attempt number is returned.
/// If every attempt fails, the last error is returned inside [`RetryExhausted`]. Retries are
/// immediate unless a backoff is supplied.
pub async fn consume_with_retry<C: QueueConsumer>(
    consumer: &mut C,
    item: &C::Item,
    max_attempts: u32,
    backoff: Option<&RetryBackoff>,
) -> Result<u32, RetryExhausted> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match consumer.consume(item).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::warn!(attempt, max_attempts, item = ?item, error = %e, "Consume attempt failed");
                if let Some(backoff) = backoff {
                    tokio::time::sleep(backoff.delay(attempt - 1)).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::*;

    /// Fails the first `failures` consume calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: u32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self { failures, calls: 0 }
        }
    }

    #[async_trait]
    impl QueueConsumer for Flaky {
        type Item = u32;

        async fn task_length(&mut self) -> anyhow::Result<usize> {
            Ok(0)
        }

        async fn dequeue(&mut self) -> anyhow::Result<Option<u32>> {
            Ok(None)
        }

        async fn enqueue(&mut self, _item: u32) -> anyhow::Result<()> {
            Ok(())
        }

        async fn consume(&mut self, _item: &u32) -> anyhow::Result<()> {
            self.calls += 1;
            if self.calls <= self.failures {
                anyhow::bail!("failure #{}", self.calls);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_calls_once() {
        let mut consumer = Flaky::new(0);
        let attempts = consume_with_retry(&mut consumer, &7, 3, None).await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(consumer.calls, 1);
    }

    #[tokio::test]
    async fn success_after_failures_stops_retrying() {
        let mut consumer = Flaky::new(2);
        let attempts = consume_with_retry(&mut consumer, &7, 3, None).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(consumer.calls, 3);
    }

    #[tokio::test]
    async fn exhausted_returns_last_error() {
        let mut consumer = Flaky::new(u32::MAX);
        let err = consume_with_retry(&mut consumer, &7, 3, None)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(consumer.calls, 3);
        assert_eq!(err.last_error.to_string(), "failure #3");
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let mut consumer = Flaky::new(u32::MAX);
        let err = consume_with_retry(&mut consumer, &7, 0, None)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(consumer.calls, 1);
    }

    #[tokio::test]
    async fn backoff_waits_between_attempts() {
        let backoff = RetryBackoff {
            first: Duration::from_millis(20),
            max: Duration::from_millis(20),
            factor: 1.0,
        };
        let mut consumer = Flaky::new(2);
        let started = Instant::now();
        consume_with_retry(&mut consumer, &7, 3, Some(&backoff))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
