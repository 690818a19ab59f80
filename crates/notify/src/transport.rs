//! Shared HTTP transport with bounded retries.
//!
//! Every outbound HTTP call (token exchange, incident queries, webhooks) goes
//! through [`HttpTransport::execute`], which applies the request timeout and
//! retries transient failures with exponential backoff.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(360);

/// Statuses that are retried before giving up.
pub const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::UNAUTHORIZED,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Errors produced by the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-success status (after retries)
    #[error("Request {method} {url} failed with {status} - {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },

    /// The request could not be sent or the response could not be read
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Streaming bodies cannot be replayed
    #[error("Request {0} has a body that cannot be retried")]
    NotReplayable(String),
}

impl TransportError {
    /// HTTP status of the failed response, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status(),
            Self::NotReplayable(_) => None,
        }
    }
}

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    #[must_use]
    pub fn retries_status(&self, status: StatusCode) -> bool {
        RETRY_STATUSES.contains(&status)
    }
}

/// HTTP client wrapper that applies the timeout and retry policy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Build a transport. `accept_invalid_certs` is meant for on-prem
    /// deployments that serve self-signed certificates.
    pub fn new(accept_invalid_certs: bool) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Underlying client, used to start request builders.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request, retrying transient statuses and connection failures.
    ///
    /// Returns the first successful response. A non-success response that is
    /// not retried (or exhausts the budget) becomes [`TransportError::Status`].
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();
        let mut retry = 0;

        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| TransportError::NotReplayable(format!("{method} {url}")))?;

            match self.client.execute(attempt).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(%method, %url, %status, "Request succeeded");
                        return Ok(response);
                    }

                    if self.retry.retries_status(status) && retry < self.retry.max_retries {
                        let delay = self.retry.delay_for(retry);
                        warn!(%method, %url, %status, retry = retry + 1, ?delay, "Retrying request");
                        tokio::time::sleep(delay).await;
                        retry += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::Status {
                        method,
                        url,
                        status,
                        body,
                    });
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for(retry);
                    warn!(%method, %url, error = %e, retry = retry + 1, ?delay, "Retrying request");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_transport(max_retries: u32) -> HttpTransport {
        HttpTransport::new(false)
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
            })
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
    }

    #[test]
    fn test_retry_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.retries_status(StatusCode::UNAUTHORIZED));
        assert!(policy.retries_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!policy.retries_status(StatusCode::BAD_REQUEST));
        assert!(!policy.retries_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = fast_transport(5);
        let response = transport
            .execute(transport.client().get(format!("{}/flaky", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(3)
            .mount(&server)
            .await;

        let transport = fast_transport(2);
        let err = transport
            .execute(transport.client().post(format!("{}/down", server.uri())).body("x"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reject"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let transport = fast_transport(5);
        let err = transport
            .execute(transport.client().post(format!("{}/reject", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }
}
