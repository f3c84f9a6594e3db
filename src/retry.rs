use std::time::Duration;

/// Bounded retry with linear backoff: the n-th failed attempt is followed by a sleep of
/// `delay * n`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// No sleeping between attempts, used by tests and in-memory clients
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Runs `operation` until it succeeds or `max_attempts` is reached, returning the last error in
/// the latter case
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, operation_name: &str, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts {
                    log::error!("{} failed after {} attempts: {:#}", operation_name, attempt, err);
                    return Err(err);
                }

                let delay = config.delay * attempt;
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {:#}",
                    operation_name,
                    attempt,
                    config.max_attempts,
                    delay.as_millis(),
                    err
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_failures() -> anyhow::Result<()> {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry_with_backoff(&RetryConfig::immediate(5), "flaky", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                bail!("not yet");
            }
            Ok(42)
        })
        .await?;

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: anyhow::Result<()> = retry_with_backoff(&RetryConfig::immediate(3), "broken", || async move {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            bail!("failure {}", call)
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_linear_backoff() {
        let started = tokio::time::Instant::now();

        let result: anyhow::Result<()> =
            retry_with_backoff(&RetryConfig::new(3, Duration::from_millis(20)), "slow", || async { bail!("nope") }).await;

        assert!(result.is_err());
        // 20ms after the first attempt, 40ms after the second
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
