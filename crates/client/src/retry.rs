//! Request retries with exponential backoff.

use crate::error::{ClientError, ClientResult};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use isolate_core::RetryConfig;

/// Which responses count as transient for a request.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryOn {
    /// Retry 404 responses (eventual consistency on reads).
    pub not_found: bool,
}

/// Send a request, retrying transport failures and transient statuses.
///
/// Retries on transport errors and 5xx responses (plus 404 when asked).
/// Returns immediately on success or on a client error that won't resolve
/// with retries. After `max_attempts` the last failure is returned.
pub async fn send_with_retry(
    transport: &dyn Transport,
    policy: &RetryConfig,
    request: &HttpRequest,
    retry_on: RetryOn,
) -> ClientResult<HttpResponse> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match transport.perform(request.clone()).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status;
                ClientError::Status {
                    url: request.url.to_string(),
                    status,
                    body: response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("<unreadable body: {e}>")),
                }
            }
            Err(source) => ClientError::Transport {
                url: request.url.to_string(),
                source,
            },
        };

        if attempt >= max_attempts || !error.is_retryable(retry_on.not_found) {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            method = %request.method,
            url = %request.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Request failed, retrying"
        );
        transport.wait_before_retry(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed sequence of outcomes and records requested waits.
    struct Replay {
        outcomes: Mutex<VecDeque<Result<u16, ()>>>,
        waits: Mutex<Vec<Duration>>,
    }

    impl Replay {
        fn new(outcomes: Vec<Result<u16, ()>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                waits: Mutex::new(Vec::new()),
            }
        }

        fn remaining(&self) -> usize {
            self.outcomes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Replay {
        async fn perform(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            match self.outcomes.lock().unwrap().pop_front() {
                Some(Ok(status)) => Ok(HttpResponse::from_bytes(status, "body")),
                Some(Err(())) => Err(TransportError::new("connection reset")),
                None => panic!("unexpected extra request"),
            }
        }

        async fn wait_before_retry(&self, delay: Duration) {
            self.waits.lock().unwrap().push(delay);
        }
    }

    fn policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 1000,
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::get(Url::parse("http://example.com/content/get_token").unwrap())
    }

    #[tokio::test]
    async fn test_retries_transient_failures_then_succeeds() {
        let transport = Replay::new(vec![Err(()), Ok(503), Ok(200)]);
        let response = send_with_retry(&transport, &policy(5), &request(), RetryOn::default())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            *transport.waits.lock().unwrap(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = Replay::new(vec![Ok(500), Ok(500), Ok(500)]);
        let err = send_with_retry(&transport, &policy(3), &request(), RetryOn::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let transport = Replay::new(vec![Ok(403), Ok(200)]);
        let err = send_with_retry(&transport, &policy(5), &request(), RetryOn::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 403, .. }));
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test]
    async fn test_not_found_retried_only_when_asked() {
        let transport = Replay::new(vec![Ok(404), Ok(200)]);
        let err = send_with_retry(&transport, &policy(5), &request(), RetryOn::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 404, .. }));

        let transport = Replay::new(vec![Ok(404), Ok(200)]);
        let response = send_with_retry(
            &transport,
            &policy(5),
            &request(),
            RetryOn { not_found: true },
        )
        .await
        .unwrap();
        assert_eq!(response.status, 200);
    }
}
