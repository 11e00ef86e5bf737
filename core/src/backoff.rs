//! Jittered exponential backoff shared by the RPC retry loop (Tailer and
//! Backfill Runner) and the Publisher's per-message retry policy.

use std::time::Duration;

use rand::Rng;

pub struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Backoff { current: min, min, max }
    }

    /// Sleeps for the current delay (±25% jitter), then doubles it for
    /// next time, capped at `max`.
    pub async fn wait(&mut self) {
        let jitter_frac = rand::thread_rng().gen_range(0.75..1.25);
        let jittered = self.current.mul_f64(jitter_frac);
        tokio::time::sleep(jittered).await;
        self.current = std::cmp::min(self.current * 2, self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Retries `f` with exponential backoff from 1s to 60s, returning the
/// last error if every attempt fails. Used for RPC calls, which are
/// treated as transient-only.
pub async fn retry_rpc<F, Fut, T, E>(max_attempts: u32, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, max_attempts, error = %e, "rpc call failed, retrying");
                last_err = Some(e);
                if attempt < max_attempts {
                    backoff.wait().await;
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_rpc_succeeds_without_retrying_on_first_try() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry_rpc(3, || {
            calls += 1;
            async { Ok(7) }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_rpc_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry_rpc(3, || {
            calls += 1;
            async { Err("boom") }
        })
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(b.current, Duration::from_secs(1));
        assert_eq!(b.max, Duration::from_secs(4));
    }
}
