// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health endpoint schema.
//!
//! The service answers `GET /health` with `{"status": "...", "version": "..."}`.
//! Older releases report the state in a `health` field instead; that field is
//! only consulted when `status` is absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Observed state of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Fully initialized and serving.
    Ready,
    /// Reachable, but not fully operational yet.
    Degraded,
    /// No successful HTTP response.
    Unreachable,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Ready => write!(f, "ready"),
            ServiceState::Degraded => write!(f, "degraded"),
            ServiceState::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A single health observation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ServiceState,
    /// Version reported by the service (empty when unknown).
    pub version: String,
    pub observed_at: DateTime<Utc>,
    /// Raw status string or parse problem, when it adds information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    pub fn ready(version: impl Into<String>) -> Self {
        Self {
            status: ServiceState::Ready,
            version: version.into(),
            observed_at: Utc::now(),
            detail: None,
        }
    }

    pub fn degraded(version: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: ServiceState::Degraded,
            version: version.into(),
            observed_at: Utc::now(),
            detail: Some(detail.into()),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            status: ServiceState::Unreachable,
            version: String::new(),
            observed_at: Utc::now(),
            detail: Some(detail.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ServiceState::Ready
    }
}

#[derive(Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    health: Option<String>,
    #[serde(default)]
    version: Option<Value>,
}

/// Parse a 2xx health response body.
///
/// The caller has already received a successful HTTP response, so the result
/// is never `Unreachable`: anything other than `status == "ready"` (including
/// a body that is not valid JSON) is reported as `Degraded`.
pub fn parse_health_body(body: &[u8], observed_at: DateTime<Utc>) -> HealthStatus {
    let parsed: HealthBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return HealthStatus {
                status: ServiceState::Degraded,
                version: String::new(),
                observed_at,
                detail: Some(format!("malformed health body: {}", e)),
            };
        }
    };

    let version = match parsed.version {
        Some(Value::String(v)) => v,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    match parsed.status.or(parsed.health) {
        Some(raw) if raw.trim().eq_ignore_ascii_case("ready") => HealthStatus {
            status: ServiceState::Ready,
            version,
            observed_at,
            detail: None,
        },
        Some(raw) => HealthStatus {
            status: ServiceState::Degraded,
            version,
            observed_at,
            detail: Some(raw),
        },
        None => HealthStatus {
            status: ServiceState::Degraded,
            version,
            observed_at,
            detail: Some("missing status field".to_string()),
        },
    }
}
