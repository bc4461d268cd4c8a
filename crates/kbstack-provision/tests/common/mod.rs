// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for kbstack-provision integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use kbstack_client::HealthStatus;
use kbstack_provision::config::{VECTOR_DB_API_KEY, VECTOR_DB_URL};
use kbstack_provision::materializer::CredentialRequest;
use kbstack_provision::{
    CredentialSource, DeployContext, EnvSource, ProbeOutcome, Result, ServiceHandle,
};
use tempfile::TempDir;

pub const TEST_URL: &str = "https://vectors.example.com:6333";
pub const TEST_KEY: &str = "qd-test-key-0123456789abcdef";

/// Credentials as they would come from the environment.
pub fn env_source(pairs: &[(&str, &str)]) -> EnvSource {
    EnvSource::from_map(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    )
}

pub fn valid_credentials() -> EnvSource {
    env_source(&[(VECTOR_DB_URL, TEST_URL), (VECTOR_DB_API_KEY, TEST_KEY)])
}

/// Counts how often it was asked, so tests can assert "no re-prompt".
pub struct CountingSource<S> {
    inner: S,
    calls: Cell<u32>,
}

impl<S> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl<S: CredentialSource> CredentialSource for CountingSource<S> {
    fn solicit(&self, request: &CredentialRequest) -> Result<Option<String>> {
        self.calls.set(self.calls.get() + 1);
        self.inner.solicit(request)
    }
}

/// A project in a fresh temp directory with fast probes.
pub struct TestProject {
    pub dir: TempDir,
    pub context: DeployContext,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let context = DeployContext::for_project(dir.path())
            .with_probe_interval(Duration::from_secs(2))
            .with_probe_timeout(Duration::from_secs(1));
        Self { dir, context }
    }
}

pub fn handle() -> ServiceHandle {
    ServiceHandle {
        project: "kb".to_string(),
        container_ids: vec!["c0ffee000001".to_string()],
        started_at: Utc::now(),
    }
}

pub fn ready() -> ProbeOutcome {
    ProbeOutcome::Answered(HealthStatus::ready("1.4.2"))
}

pub fn degraded() -> ProbeOutcome {
    ProbeOutcome::Answered(HealthStatus::degraded("1.4.2", "initializing"))
}

pub fn refused() -> ProbeOutcome {
    ProbeOutcome::Unreachable("error sending request: connection refused".to_string())
}
