//! Core HTTP operations with rate limiting and retry logic
//!
//! Every source client funnels its requests through an [`HttpHandler`].
//! Requests are paced by a `governor` rate limiter, and HTTP 429/503
//! responses or transport failures are retried a bounded number of times
//! with a fixed delay. Exhausting the budget fails only the call at hand.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::constants::http;
use crate::errors::{HttpError, HttpResult};

/// Bounded fixed-delay retry policy for outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

/// HTTP operations handler with resilience patterns
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>,
    retry: RetryPolicy,
}

impl HttpHandler {
    /// Creates a new HttpHandler
    ///
    /// A zero `rate_limit_rps` is treated as one request per second.
    pub fn new(client: Client, rate_limit_rps: u32, retry: RetryPolicy) -> Self {
        let rate = NonZeroU32::new(rate_limit_rps).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches a response with rate limiting and retry logic
    ///
    /// Non-success statuses other than 429/503 are returned as
    /// [`HttpError::Status`] without retrying.
    pub async fn get_response(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> HttpResult<reqwest::Response> {
        let mut retries = 0;
        loop {
            self.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(http::RATE_LIMIT_JITTER))
                .await;

            match self
                .client
                .get(url.as_str())
                .headers(headers.clone())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                    {
                        if retries < self.retry.max_retries {
                            retries += 1;
                            warn!(
                                "HTTP {} from {} (retry {}/{}). Backing off for {}ms",
                                status.as_u16(),
                                url,
                                retries,
                                self.retry.max_retries,
                                self.retry.delay.as_millis()
                            );
                            tokio::time::sleep(self.retry.delay).await;
                            continue;
                        }
                        let attempts = retries + 1;
                        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                            HttpError::RateLimitExceeded {
                                attempts,
                                url: url.to_string(),
                            }
                        } else {
                            HttpError::ServerOverloaded {
                                attempts,
                                url: url.to_string(),
                            }
                        });
                    }

                    if !status.is_success() {
                        return Err(HttpError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }

                    debug!("Successfully fetched response: {}", url);
                    return Ok(response);
                }
                Err(e) if retries < self.retry.max_retries => {
                    retries += 1;
                    warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {}ms",
                        retries,
                        self.retry.max_retries,
                        e,
                        self.retry.delay.as_millis()
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    warn!("Request to {} failed after {} retries: {}", url, retries, e);
                    return Err(HttpError::Request(e));
                }
            }
        }
    }

    /// Fetches a response body as bytes
    pub async fn get_bytes(&self, url: &Url, headers: &HeaderMap) -> HttpResult<Vec<u8>> {
        let response = self.get_response(url, headers).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Parse an absolute URL
pub fn parse_url(raw: &str) -> HttpResult<Url> {
    Url::parse(raw).map_err(|e| HttpError::InvalidUrl {
        url: raw.to_string(),
        error: e.to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::client::config::ClientConfig;
    use std::sync::atomic::Ordering;

    fn fast_handler(max_retries: u32) -> HttpHandler {
        let client = ClientConfig::default().build_http_client().unwrap();
        HttpHandler::new(
            client,
            1000,
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let (base, hits) = test_server::serve(vec![
            (429, Vec::new()),
            (429, Vec::new()),
            (200, b"ok".to_vec()),
        ])
        .await;
        let handler = fast_handler(3);

        let url = parse_url(&format!("{}/listing", base)).unwrap();
        let body = handler.get_bytes(&url, &HeaderMap::new()).await.unwrap();
        assert_eq!(body, b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_exhausted() {
        let (base, hits) = test_server::serve(vec![(429, Vec::new())]).await;
        let handler = fast_handler(2);

        let url = parse_url(&format!("{}/listing", base)).unwrap();
        let result = handler.get_bytes(&url, &HeaderMap::new()).await;
        assert!(matches!(
            result,
            Err(HttpError::RateLimitExceeded { attempts: 3, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (base, hits) = test_server::serve(vec![(404, Vec::new())]).await;
        let handler = fast_handler(3);

        let url = parse_url(&format!("{}/missing", base)).unwrap();
        let result = handler.get_bytes(&url, &HeaderMap::new()).await;
        assert!(matches!(result, Err(HttpError::Status { status: 404, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_url_rejects_relative() {
        assert!(parse_url("/relative/path").is_err());
        assert!(parse_url("https://www.pixiv.net/ranking.php").is_ok());
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let client = ClientConfig::default().build_http_client().unwrap();
        let handler = HttpHandler::new(
            client,
            0,
            RetryPolicy {
                max_retries: 0,
                delay: Duration::ZERO,
            },
        );
        assert_eq!(handler.retry_policy().max_retries, 0);
    }
}
