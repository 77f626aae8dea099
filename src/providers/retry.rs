//! Retry logic with exponential backoff for generator HTTP requests.
//!
//! Handles transient failures like 5xx errors, rate limits (429), and
//! connection issues.

use std::future::Future;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Determines if a reqwest error is retryable.
///
/// Connection errors, timeouts, and other transient issues are retryable.
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect()
        || error.is_timeout()
        || error.is_request()
        || error
            .status()
            .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            .unwrap_or(false)
}

/// Execute an async request with retry logic.
///
/// `make_request` is called for each attempt. Returns the first response whose
/// status is not retryable (or the last response once retries are exhausted),
/// or the last error.
pub async fn with_retry<F, Fut>(
    config: &RetryConfig,
    service: &str,
    operation: &str,
    make_request: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    if !config.enabled {
        return make_request().await;
    }

    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        let is_last = attempt + 1 >= max_attempts;

        match make_request().await {
            Ok(response) => {
                let status = response.status();

                if config.should_retry_status(status.as_u16()) && !is_last {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        service,
                        operation,
                        status = %status,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        "Retryable status code, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    debug!(
                        service,
                        operation,
                        status = %status,
                        attempt = attempt + 1,
                        "Request completed after retry"
                    );
                }

                return Ok(response);
            }
            Err(error) => {
                if is_retryable_error(&error) && !is_last {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        service,
                        operation,
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        "Retryable error, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    warn!(
                        service,
                        operation,
                        error = %error,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts"
                    );
                }

                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::providers::test_utils::SequentialResponder;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
            ..Default::default()
        }
    }

    async fn post(server: &MockServer, config: &RetryConfig) -> reqwest::Response {
        let client = reqwest::Client::new();
        let url = format!("{}/chat/completions", server.uri());
        with_retry(config, "test", "generate", || async {
            client.post(&url).send().await
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::fail_then_succeed(
            2,
            ResponseTemplate::new(200).set_body_string("ok"),
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        let response = post(&server, &fast_retry(3)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(responder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::always_fail();
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        let response = post(&server, &fast_retry(2)).await;
        assert_eq!(response.status(), 500);
        assert_eq!(responder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::new(vec![ResponseTemplate::new(401)]);
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        let response = post(&server, &fast_retry(3)).await;
        assert_eq!(response.status(), 401);
        assert_eq!(responder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_makes_single_attempt() {
        let server = MockServer::start().await;
        let responder = SequentialResponder::always_fail();
        Mock::given(method("POST"))
            .respond_with(responder.clone())
            .mount(&server)
            .await;

        let config = RetryConfig {
            enabled: false,
            ..fast_retry(3)
        };
        let response = post(&server, &config).await;
        assert_eq!(response.status(), 500);
        assert_eq!(responder.call_count(), 1);
    }
}
