//! Retry with exponential backoff for every outbound network call.
//!
//! Two layers: a generic async combinator (`retry_with_backoff`) that knows
//! nothing about HTTP, and a `Transport` adapter that classifies `reqwest`
//! outcomes into the combinator's vocabulary. Rate-limit responses carrying a
//! `retry-after` hint sleep exactly the hint; everything else retryable uses
//! `base * 2^attempt`.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::TransportError;

/// HTTP statuses worth retrying. 429 is handled separately so the server's
/// wait hint can be honored.
const RETRYABLE_STATUS: &[u16] = &[500, 502, 503, 504];

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Backoff parameters shared by all transports.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt, so `max_retries + 1` calls total.
    pub max_retries: u32,
    /// Base delay for the exponential formula.
    pub base_delay: Duration,
    /// Base delay for rate-limit responses without a server hint.
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, attempts counted from 0.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Backoff for a rate-limit response without a server hint.
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        self.rate_limit_delay * 2u32.saturating_pow(attempt)
    }
}

/// Classification of one attempt's outcome.
pub enum Attempt<T, E> {
    /// Final outcome: a success, or a response the caller handles itself.
    Done(T),
    /// Transient failure; retry with exponential backoff.
    Retry(E),
    /// Rate-limited; retry after the server hint if one was supplied.
    RateLimited { error: E, hint: Option<Duration> },
}

/// Drive `op` until it reports `Done` or the retry budget is spent.
///
/// `op` receives the 0-based attempt index so adapters can return the final
/// response verbatim on the last attempt. After exhaustion the last error is
/// returned unchanged — nothing is swallowed.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(error) => {
                if attempt < policy.max_retries {
                    let delay = policy.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = policy.max_retries,
                        delay_secs = delay.as_secs(),
                        "transient failure: {error} — retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(error);
            }
            Attempt::RateLimited { error, hint } => {
                if attempt < policy.max_retries {
                    let delay = hint.unwrap_or_else(|| policy.rate_limit_backoff(attempt));
                    warn!(
                        attempt = attempt + 1,
                        max = policy.max_retries,
                        delay_secs = delay.as_secs(),
                        hinted = hint.is_some(),
                        "rate limited — retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(error);
            }
        }
    }

    // The loop only falls through after at least one Retry/RateLimited arm.
    Err(last_error.expect("retry loop exited without recording an error"))
}

/// HTTP transport: a shared `reqwest` client plus the retry policy.
///
/// Every collaborator client routes its calls through `execute`, so retry
/// behavior is uniform across the Cursor, GitHub, Slack, image, and deploy
/// APIs.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            policy,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, retrying per policy. `endpoint` labels the call in
    /// logs and errors.
    ///
    /// Mirrors the fall-through rule of the classification: a retryable
    /// status on the *final* attempt is returned as a plain response so the
    /// caller sees it verbatim rather than a synthesized error.
    pub async fn execute(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        // Streaming bodies can't be cloned for re-issue; send those once.
        if request.try_clone().is_none() {
            return request.send().await.map_err(|source| TransportError::Network {
                endpoint: endpoint.to_string(),
                source,
            });
        }

        let max = self.policy.max_retries;
        retry_with_backoff(&self.policy, |attempt| {
            let req = request
                .try_clone()
                .expect("clonability checked before the retry loop");
            async move {
                match req.send().await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if status == 429 && attempt < max {
                            let hint = retry_after_hint(&resp);
                            Attempt::RateLimited {
                                error: TransportError::Status {
                                    endpoint: endpoint.to_string(),
                                    status,
                                    body: "rate limited".to_string(),
                                },
                                hint,
                            }
                        } else if RETRYABLE_STATUS.contains(&status) && attempt < max {
                            Attempt::Retry(TransportError::Status {
                                endpoint: endpoint.to_string(),
                                status,
                                body: "server busy".to_string(),
                            })
                        } else {
                            Attempt::Done(resp)
                        }
                    }
                    Err(source) => Attempt::Retry(TransportError::Network {
                        endpoint: endpoint.to_string(),
                        source,
                    }),
                }
            }
        })
        .await
    }

    /// `execute`, then fail on any non-2xx status with the response body.
    pub async fn execute_ok(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let resp = self.execute(endpoint, request).await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Parse a `retry-after` header as whole seconds.
fn retry_after_hint(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(2),
            rate_limit_delay: Duration::from_secs(2),
        }
    }

    #[test]
    fn backoff_delay_is_exponential_from_attempt_zero() {
        let p = policy(3);
        assert_eq!(p.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(p.backoff_delay(2), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_issues_exactly_one_call() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Done(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_then_success_issues_failures_plus_one_calls() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Attempt::Retry("busy".to_string())
                } else {
                    Attempt::Done(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_issues_max_plus_one_calls_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Attempt::Retry(format!("failure-{n}")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err(), "failure-3");
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_delays_accumulate_between_attempts() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = retry_with_backoff(&policy(2), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("busy".to_string()) }
        })
        .await;
        // 2s + 4s between the three calls; no sleep after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_overrides_exponential_formula() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Attempt::RateLimited {
                        error: "429".to_string(),
                        hint: Some(Duration::from_secs(17)),
                    }
                } else {
                    Attempt::Done(1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_hint_uses_backoff_formula() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let _: Result<u32, String> = retry_with_backoff(&policy(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Attempt::RateLimited {
                        error: "429".to_string(),
                        hint: None,
                    }
                } else {
                    Attempt::Done(1)
                }
            }
        })
        .await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_call() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&policy(0), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("nope".to_string()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }
}
