// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the service client.

use std::time::Duration;

use url::Url;

use crate::breaker::BreakerConfig;
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// Configuration for the ServiceClient.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the knowledge service (always ends with `/`).
    pub base_url: Url,
    /// Bearer token for the service API, if it requires one.
    pub api_key: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout (applies to every single attempt).
    pub request_timeout: Duration,
    /// Retry policy for resilient calls.
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Lifetime of cached GET responses. Zero disables caching.
    pub cache_ttl: Duration,
    /// Maximum number of cached responses.
    pub cache_capacity: usize,
    /// Maximum in-flight requests for batch calls.
    pub max_concurrency: usize,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).unwrap(), // constant, always valid
            api_key: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 256,
            max_concurrency: 5,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `KBSTACK_SERVICE_URL`: Base URL (default: "http://127.0.0.1:8000/")
    /// - `KBSTACK_API_KEY`: Bearer token for the service API (default: none)
    /// - `KBSTACK_CONNECT_TIMEOUT_MS`: Connection timeout in milliseconds (default: 5000)
    /// - `KBSTACK_REQUEST_TIMEOUT_MS`: Request timeout in milliseconds (default: 30000)
    /// - `KBSTACK_MAX_CONCURRENCY`: In-flight cap for batch calls (default: 5)
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("KBSTACK_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base_url(&base_url)
            .map_err(|e| ClientError::Config(format!("invalid KBSTACK_SERVICE_URL: {}", e)))?;

        let api_key = std::env::var("KBSTACK_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let connect_timeout_ms = parse_env_u64("KBSTACK_CONNECT_TIMEOUT_MS", 5_000)?;
        let request_timeout_ms = parse_env_u64("KBSTACK_REQUEST_TIMEOUT_MS", 30_000)?;
        let max_concurrency = parse_env_u64("KBSTACK_MAX_CONCURRENCY", 5)? as usize;
        if max_concurrency == 0 {
            return Err(ClientError::Config(
                "KBSTACK_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            api_key,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            max_concurrency,
            ..Self::default()
        })
    }

    /// Set the base URL. A trailing slash is added when missing so that
    /// relative paths join underneath it.
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        self.base_url = normalize_base_url(url)?;
        Ok(self)
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the circuit breaker thresholds.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Set the cache lifetime. `Duration::ZERO` disables caching.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the batch concurrency cap (minimum 1).
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Resolve a path relative to the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// The service health endpoint.
    pub fn health_url(&self) -> Result<Url> {
        self.endpoint("health")
    }
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::Config(format!(
            "unsupported scheme '{}' (expected http or https)",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_env_u64(var: &str, default: u64) -> Result<u64> {
    match std::env::var(var) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid {}: {}", var, e))),
        Err(_) => Ok(default),
    }
}
