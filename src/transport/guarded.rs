// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network fetch primitive used by every strategy: retry around breaker
//! around a timed transport call.
//!
//! ```text
//! retry ─▶ breaker ─▶ timeout(transport.fetch) ─▶ error_for_status
//! ```
//!
//! Only failures that say the dependency is unhealthy count against the
//! breaker (see [`ClientError::trips_breaker`]). An open breaker surfaces as
//! [`ClientError::CircuitOpen`], which is not retried.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::{Request, Response, Transport};
use crate::error::ClientError;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::resilience::retry::{retry, RetryConfig, RetryOverrides};

pub struct GuardedTransport {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl GuardedTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            breaker,
            retry,
            request_timeout,
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetch with the default retry policy. Non-2xx responses are errors.
    pub async fn execute(&self, request: &Request) -> Result<Response, ClientError> {
        self.execute_with(request, &self.retry).await
    }

    /// Fetch with per-call retry overrides merged over the default.
    pub async fn execute_with_overrides(
        &self,
        request: &Request,
        overrides: &RetryOverrides,
    ) -> Result<Response, ClientError> {
        let config = self.retry.with_overrides(overrides);
        self.execute_with(request, &config).await
    }

    pub async fn execute_with(&self, request: &Request, config: &RetryConfig) -> Result<Response, ClientError> {
        let operation = format!("{} {}", request.method, request.url);
        retry(&operation, config, || self.execute_once(request)).await
    }

    /// Single attempt through the breaker, no retries.
    pub async fn execute_once(&self, request: &Request) -> Result<Response, ClientError> {
        let deadline = request.timeout.unwrap_or(self.request_timeout);

        let result = self
            .breaker
            .call_filtered(
                || async {
                    let response = match timeout(deadline, self.transport.fetch(request)).await {
                        Ok(result) => result?,
                        Err(_) => {
                            debug!(url = %request.url, ?deadline, "Request timed out");
                            return Err(ClientError::Timeout(deadline));
                        }
                    };
                    response.error_for_status()
                },
                ClientError::trips_breaker,
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(CircuitError::Rejected) => Err(ClientError::CircuitOpen(self.breaker.name().to_string())),
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{CircuitConfig, CircuitState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed script of results, then repeats the last one.
    struct Scripted {
        script: Mutex<VecDeque<Result<Response, ClientError>>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Response, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(vec![Ok(Response::new(200, "late"))].into()),
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn fetch(&self, _request: &Request) -> Result<Response, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn guarded(transport: Arc<Scripted>, threshold: u32) -> GuardedTransport {
        let breaker = Arc::new(CircuitBreaker::new(
            "api",
            CircuitConfig {
                failure_threshold: threshold,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
        ));
        GuardedTransport::new(transport, breaker, RetryConfig::test(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let transport = Scripted::new(vec![
            Ok(Response::new(503, "down")),
            Ok(Response::new(502, "down")),
            Ok(Response::new(200, "{}")),
        ]);
        let guarded = guarded(transport.clone(), 10);

        let response = guarded.execute(&Request::get("/api/x")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_client_error_fails_fast_and_does_not_trip() {
        let transport = Scripted::new(vec![Ok(Response::new(404, "missing"))]);
        let guarded = guarded(transport.clone(), 1);

        let err = guarded.execute(&Request::get("/api/x")).await.unwrap_err();
        assert!(matches!(err, ClientError::Client { status: 404, .. }));
        assert_eq!(transport.calls(), 1);
        assert_eq!(guarded.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_surfaces_circuit_open_without_calling() {
        let transport = Scripted::new(vec![Err(ClientError::TransientNetwork("reset".into()))]);
        let guarded = guarded(transport.clone(), 2);

        // First attempt + first retry trip the breaker; the second retry is rejected
        let err = guarded.execute(&Request::get("/api/x")).await.unwrap_err();
        assert_eq!(err, ClientError::CircuitOpen("api".into()));
        assert_eq!(transport.calls(), 2);

        let err = guarded.execute(&Request::get("/api/x")).await.unwrap_err();
        assert_eq!(err, ClientError::CircuitOpen("api".into()));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable_timeout_error() {
        let transport = Scripted::slow(Duration::from_secs(5));
        let guarded = guarded(transport.clone(), 10);

        let request = Request::get("/api/slow").with_timeout(Duration::from_millis(100));
        let err = guarded
            .execute_with_overrides(&request, &RetryOverrides { max_retries: Some(1), ..Default::default() })
            .await
            .unwrap_err();

        assert_eq!(err, ClientError::Timeout(Duration::from_millis(100)));
        assert_eq!(transport.calls(), 2);
    }
}
