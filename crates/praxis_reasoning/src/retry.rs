//! Exponential backoff for model endpoint requests.
//!
//! Rate limits, 5xx responses and transport errors are retried. Any other
//! non-success status (bad request, auth, not found) fails on the spot.

use anyhow::Result;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Send a request built by `send` until it returns a success status.
pub async fn send_with_retry<F, Fut>(policy: &RetryPolicy, endpoint: &str, send: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response>>,
{
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        match send().await {
            Ok(response) if response.status().is_success() => {
                if attempt > 1 {
                    tracing::info!("{} recovered on attempt {}", endpoint, attempt);
                }
                return Ok(response);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !is_transient(status) {
                    anyhow::bail!("{} rejected the request ({}): {}", endpoint, status, body);
                }
                tracing::warn!(
                    "{} answered {} (attempt {}/{}): {}",
                    endpoint,
                    status,
                    attempt,
                    policy.max_attempts,
                    body.chars().take(200).collect::<String>()
                );
                last_error = format!("{status}: {body}");
            }
            Err(e) => {
                tracing::warn!(
                    "{} unreachable (attempt {}/{}): {:#}",
                    endpoint,
                    attempt,
                    policy.max_attempts,
                    e
                );
                last_error = format!("{e:#}");
            }
        }

        if attempt < policy.max_attempts {
            let wait = policy.backoff(attempt) + Duration::from_millis(jitter_ms());
            tracing::debug!("{} retrying in {:.1}s", endpoint, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    anyhow::bail!(
        "{} failed after {} attempts, last error: {}",
        endpoint,
        policy.max_attempts,
        last_error
    )
}

/// 0-499ms taken from the clock's sub-second nanos.
fn jitter_ms() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos % 500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
    }

    #[test]
    fn test_with_attempts_never_zero() {
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
        assert!(jitter_ms() < 500);
    }
}
