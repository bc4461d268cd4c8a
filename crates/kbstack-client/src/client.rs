// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the knowledge service.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, instrument};
use url::Url;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::health::{HealthStatus, parse_health_body};

/// Client for the knowledge service API.
///
/// Two kinds of calls are offered:
/// - probes (`probe_health`, `probe_health_at`) issue exactly one request and
///   bypass the breaker, so a caller with its own polling loop stays in control;
/// - resilient calls (`health_check`, `get_json`, `post_json`, `post_batch`) go
///   through the circuit breaker and the retry policy, and GETs are cached.
pub struct ServiceClient {
    config: ClientConfig,
    http: reqwest::Client,
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<TtlCache<String, Value>>,
    limiter: Arc<Semaphore>,
}

impl ServiceClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            breaker: Mutex::new(CircuitBreaker::new(config.breaker.clone())),
            cache: Mutex::new(TtlCache::new(config.cache_ttl, config.cache_capacity)),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            http,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().await.state()
    }

    /// Issue one request to the configured health endpoint.
    pub async fn probe_health(&self) -> Result<HealthStatus> {
        let url = self.config.health_url()?;
        self.probe_health_at(&url).await
    }

    /// Issue one request to `url` and parse the health body.
    ///
    /// Transport failures and non-2xx responses are errors; any 2xx response
    /// yields a `HealthStatus` that is either `Ready` or `Degraded`.
    pub async fn probe_health_at(&self, url: &Url) -> Result<HealthStatus> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes().await?;
        Ok(parse_health_body(&body, Utc::now()))
    }

    /// Health check with retries (no breaker, no cache).
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.config.health_url()?;
        let url = &url;
        self.config
            .retry
            .run(move |_| self.probe_health_at(url))
            .await
    }

    /// GET a JSON document, served from cache while fresh.
    #[instrument(skip(self))]
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.config.endpoint(path)?;
        let key = url.to_string();

        if let Some(hit) = self.cache.lock().await.get(&key, Instant::now()) {
            debug!("Cache hit");
            return Ok(hit);
        }

        let value = self.call(Method::GET, &url, None).await?;
        self.cache
            .lock()
            .await
            .insert(key, value.clone(), Instant::now());
        Ok(value)
    }

    /// POST a JSON body and return the JSON response.
    #[instrument(skip(self, body))]
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.config.endpoint(path)?;
        self.call(Method::POST, &url, Some(body)).await
    }

    /// POST every body to `path` with at most `max_concurrency` requests in
    /// flight. Results are returned in input order.
    pub async fn post_batch(&self, path: &str, bodies: Vec<Value>) -> Vec<Result<Value>> {
        let calls = bodies.into_iter().map(|body| async move {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|e| ClientError::Config(format!("concurrency limiter closed: {}", e)))?;
            self.post_json(path, &body).await
        });
        futures::future::join_all(calls).await
    }

    async fn call(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Value> {
        self.config
            .retry
            .run(|_| {
                let method = method.clone();
                async move { self.guarded(method, url, body).await }
            })
            .await
    }

    async fn guarded(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Value> {
        if let Err(wait) = self.breaker.lock().await.try_acquire(Instant::now()) {
            return Err(ClientError::CircuitOpen {
                retry_after_ms: wait.as_millis() as u64,
            });
        }

        let result = self.send(method, url, body).await;

        let mut breaker = self.breaker.lock().await;
        match &result {
            Err(e) if e.is_retryable() => breaker.on_failure(Instant::now()),
            // A 4xx still proves the service is answering.
            _ => breaker.on_success(),
        }
        result
    }

    async fn send(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Value> {
        let mut request = self.http.request(method, url.clone());
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
