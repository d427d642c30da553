//! Outbound client settings shared by every source
//!
//! One [`ClientConfig`] describes transport limits and the retry policy;
//! each source gets its own [`HttpHandler`] built from it, paced by that
//! source's rate limit.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::{http, limits};
use crate::errors::HttpResult;

use super::http::{HttpHandler, RetryPolicy};

/// `[client]` section of the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent with every request; some listing endpoints reject empty agents
    pub user_agent: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
    pub pool_max_per_host: usize,
    /// Retries after 429/503 or transport errors
    pub max_retries: u32,
    /// Fixed pause between those retries
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: http::USER_AGENT.to_string(),
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_idle_timeout: http::POOL_IDLE_TIMEOUT,
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            max_retries: limits::MAX_RETRIES,
            retry_delay: limits::RETRY_DELAY,
        }
    }
}

impl ClientConfig {
    /// Connection-pooled reqwest client for one source
    pub fn build_http_client(&self) -> HttpResult<Client> {
        Ok(Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_per_host)
            .build()?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: self.retry_delay,
        }
    }

    /// Rate-limited handler for a source allowed `rate_limit_rps` requests
    /// per second
    pub fn source_handler(&self, rate_limit_rps: u32) -> HttpResult<HttpHandler> {
        Ok(HttpHandler::new(
            self.build_http_client()?,
            rate_limit_rps,
            self.retry_policy(),
        ))
    }
}
