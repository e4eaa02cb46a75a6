//! Exponential-backoff reconnection for the channel socket.
//!
//! When a subscription's socket drops, the subscription task calls
//! [`retry_with_backoff`] around its connect-and-subscribe step until it
//! succeeds or the [`CancellationToken`] is triggered.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// What a subscription does after its socket drops.
#[derive(Debug, Clone)]
pub enum ReconnectPolicy {
    /// Stay `Unsubscribed`; the view keeps working from REST alone.
    Disabled,
    Backoff(ReconnectConfig),
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `attempt` until it succeeds, sleeping with exponential backoff
/// between failures.
///
/// Returns `Some(value)` once an attempt succeeds, or `None` if `cancel`
/// fires first. The first attempt runs immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut tries = 0u32;

    loop {
        tries += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Reconnect cancelled");
                return None;
            }
            result = attempt() => {
                match result {
                    Ok(value) => {
                        if tries > 1 {
                            tracing::info!(attempt = tries, "Reconnected to channel provider");
                        }
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Reconnect attempt {tries} failed",
                        );
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_retry() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Option<()> = retry_with_backoff(&ReconnectConfig::default(), &cancel, || async {
            Err::<(), _>("unreachable")
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        };
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(&config, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("attempt {n} refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
