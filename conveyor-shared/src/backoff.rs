//! Capped exponential backoff for transient infrastructure errors.
//!
//! Store, queue and bus calls are retried through [`retry_with_backoff`];
//! permanent failures bubble up after the attempt cap. Jitter prevents
//! synchronized retry storms across handlers.

use crate::config::BackoffConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay sequence for one retryable operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Next delay, or `None` once the attempt cap is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.config.max_attempts {
            return None;
        }
        let exp = self.config.base_delay_ms as f64 * self.config.multiplier.powi(self.attempt as i32);
        let capped = exp.min(self.config.max_delay_ms as f64);
        let with_jitter = if self.config.jitter_enabled {
            let jitter = rand::thread_rng().gen_range(0.0..=0.1);
            capped * (1.0 + jitter)
        } else {
            capped
        };
        self.attempt += 1;
        Some(Duration::from_millis(with_jitter as u64))
    }
}

/// Run `operation` until it succeeds or the backoff sequence is
/// exhausted, sleeping between attempts. The final error is returned
/// unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = Backoff::new(config.clone());
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        operation = label,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_enabled: false,
            max_attempts,
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let mut backoff = Backoff::new(BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 250,
            multiplier: 2.0,
            jitter_enabled: false,
            max_attempts: 5,
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&fast_config(5), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn surfaces_last_error_after_cap() {
        let result: Result<(), String> = retry_with_backoff(&fast_config(3), "test", || async {
            Err("always".to_string())
        })
        .await;
        assert_eq!(result, Err("always".to_string()));
    }
}
