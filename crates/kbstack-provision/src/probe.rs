// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness prober.
//!
//! Polls the health endpoint at a fixed interval until the service reports
//! ready or the timeout elapses. Running out of time ends in one of two ways:
//!
//! - the service answered at least once: the last answer is returned as a
//!   (non-ready) `HealthStatus`, not as an error;
//! - the service never answered: `ProvisionError::ServiceUnreachable`.
//!
//! Callers that need a ready service turn the first case into an error with
//! [`require_ready`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kbstack_client::{HealthStatus, ServiceClient};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ProvisionError, Result};
use crate::launcher::ServiceHandle;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Transport failure or non-2xx response.
    Unreachable(String),
    /// A 2xx response, ready or not.
    Answered(HealthStatus),
}

/// One bounded-timeout health request.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &Url) -> ProbeOutcome;
}

#[async_trait]
impl HealthProbe for ServiceClient {
    async fn probe(&self, endpoint: &Url) -> ProbeOutcome {
        match self.probe_health_at(endpoint).await {
            Ok(health) => ProbeOutcome::Answered(health),
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }
}

/// Polls a `HealthProbe` until ready or out of time.
pub struct ReadinessProber<P> {
    probe: P,
    interval: Duration,
}

impl<P: HealthProbe> ReadinessProber<P> {
    pub fn new(probe: P, interval: Duration) -> Self {
        Self { probe, interval }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Wait until the service behind `handle` reports ready.
    ///
    /// Without a handle nothing is probed. The pause between probes is cut
    /// short at the deadline; a request in flight at the deadline may finish
    /// up to one request timeout later.
    pub async fn await_ready(
        &self,
        handle: Option<&ServiceHandle>,
        endpoint: &Url,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HealthStatus> {
        let Some(handle) = handle else {
            return Err(ProvisionError::ServiceNotRunning);
        };

        info!(
            project = %handle.project,
            endpoint = %endpoint,
            timeout_secs = timeout.as_secs(),
            "Waiting for service readiness"
        );

        let deadline = deadline_after(timeout);
        let mut attempts: u32 = 0;
        let mut last_answer: Option<HealthStatus> = None;
        let mut last_error: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            attempts += 1;
            match self.probe.probe(endpoint).await {
                ProbeOutcome::Answered(health) if health.is_ready() => {
                    info!(attempts, version = %health.version, "Service is ready");
                    return Ok(health);
                }
                ProbeOutcome::Answered(health) => {
                    debug!(attempt = attempts, status = %health.status, detail = ?health.detail, "Service not ready yet");
                    last_answer = Some(health);
                }
                ProbeOutcome::Unreachable(error) => {
                    debug!(attempt = attempts, error = %error, "Health endpoint unreachable");
                    last_error = Some(error);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let pause = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProvisionError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }

        match last_answer {
            Some(health) => {
                warn!(attempts, status = %health.status, "Readiness timeout, service answered but is not ready");
                Ok(health)
            }
            None => Err(ProvisionError::ServiceUnreachable {
                endpoint: endpoint.to_string(),
                attempts,
                last_error,
            }),
        }
    }

    /// Probe once. An unreachable endpoint is reported as a status, not an error.
    pub async fn probe_once(
        &self,
        handle: Option<&ServiceHandle>,
        endpoint: &Url,
    ) -> Result<HealthStatus> {
        if handle.is_none() {
            return Err(ProvisionError::ServiceNotRunning);
        }
        Ok(match self.probe.probe(endpoint).await {
            ProbeOutcome::Answered(health) => health,
            ProbeOutcome::Unreachable(error) => HealthStatus::unreachable(error),
        })
    }
}

/// Deadline `timeout` from now. Timeouts too large to represent wait
/// roughly thirty years instead.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

/// Turn a non-ready result into `ServiceDegraded`.
pub fn require_ready(health: HealthStatus) -> Result<HealthStatus> {
    if health.is_ready() {
        Ok(health)
    } else {
        Err(ProvisionError::ServiceDegraded {
            status: health.detail.unwrap_or_else(|| health.status.to_string()),
            version: health.version,
        })
    }
}

/// Probe that replays a fixed script of outcomes, then repeats a fallback.
///
/// Each probe takes `latency` of (tokio) time, so tests can run against a
/// paused clock.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    latency: Duration,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(script: impl IntoIterator<Item = ProbeOutcome>, fallback: ProbeOutcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// The same outcome every time.
    pub fn always(outcome: ProbeOutcome) -> Self {
        Self::new([], outcome)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, _endpoint: &Url) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl<P: HealthProbe + ?Sized> HealthProbe for std::sync::Arc<P> {
    async fn probe(&self, endpoint: &Url) -> ProbeOutcome {
        (**self).probe(endpoint).await
    }
}
