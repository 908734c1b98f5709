//! Request-level retry policy.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::response::{RequestFailure, ServiceResponse, Target};
use crate::session::{Session, SessionKind, SessionManager};
use crate::ApnsError;

/// Status codes that always merit a retry.
const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retries a request according to APNs status codes and token expiry.
pub(crate) struct RetryPolicy {
    limit: u32,
}

impl RetryPolicy {
    pub(crate) fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Whether a failure merits another attempt.
    ///
    /// Retryable: 408, 429, 500, 502, 503, 504, or a 403 carrying
    /// `ExpiredProviderToken` (the token has been regenerated by the
    /// time the failure reaches the policy). Pseudo-statuses never are.
    pub(crate) fn is_retryable(failure: &RequestFailure) -> bool {
        match failure.status_code() {
            Some(code) if RETRYABLE_STATUS_CODES.contains(&code) => true,
            Some(403) => failure.failure.error.as_deref() == Some("ExpiredProviderToken"),
            _ => false,
        }
    }

    /// Run `operation` until it succeeds, exhausts the retry budget, or
    /// fails unretryably.
    ///
    /// Each attempt acquires a session from the manager, which
    /// re-establishes destroyed sessions; after shutdown the acquisition
    /// fails with `client session is either closed or destroyed`. The
    /// server's `retry-after` is honored between attempts. A 500 that
    /// survives the loop tears down the session slot so the next request
    /// reconnects.
    pub(crate) async fn execute<F, Fut>(
        &self,
        sessions: &SessionManager,
        kind: SessionKind,
        target: &Target,
        operation: F,
    ) -> Result<ServiceResponse, RequestFailure>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<ServiceResponse, RequestFailure>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let session = match sessions.acquire(kind).await {
                Ok(session) => session,
                Err(ApnsError::SessionClosed) => {
                    return Err(RequestFailure::transport(
                        target.clone(),
                        ApnsError::SessionClosed.to_string(),
                    ))
                }
                Err(e) => {
                    return Err(RequestFailure::transport(target.clone(), e.to_string()))
                }
            };

            let failure = match operation(session).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            if !Self::is_retryable(&failure) || attempt + 1 > self.limit {
                if failure.status_code() == Some(500) {
                    sessions.teardown(kind).await;
                }
                return Err(failure);
            }

            attempt += 1;
            let delay = failure.retry_after_secs();
            debug!(
                attempt,
                delay_secs = delay,
                status = failure.failure.status.as_deref().unwrap_or(""),
                "retrying request"
            );
            if delay > 0 {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }
    }
}
