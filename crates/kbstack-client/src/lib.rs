// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kbstack Client
//!
//! HTTP client for the containerized knowledge service that `kbstack`
//! provisions. It owns the health-endpoint schema used by the readiness
//! prober and carries the integration patterns recommended for callers of
//! the service API.
//!
//! # Components
//!
//! | Module | Description |
//! |--------|-------------|
//! | `health` | `/health` response schema and lenient parsing |
//! | `client` | `ServiceClient` with single-shot probes and resilient calls |
//! | `retry` | Exponential backoff policy |
//! | `breaker` | Three-state circuit breaker (closed, open, half-open) |
//! | `cache` | TTL cache for idempotent GET responses |
//!
//! # Example
//!
//! ```no_run
//! use kbstack_client::{ClientConfig, ServiceClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ServiceClient::new(ClientConfig::from_env()?)?;
//!
//! // One probe, no retries
//! let health = client.probe_health().await?;
//! println!("service is {} (version {})", health.status, health.version);
//!
//! // Resilient call: breaker + retry + cache
//! let datasets = client.get_json("api/v1/datasets").await?;
//! println!("{}", datasets);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cache;
mod client;
mod config;
mod error;
pub mod health;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::TtlCache;
pub use client::ServiceClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use health::{HealthStatus, ServiceState, parse_health_body};
pub use retry::RetryPolicy;
