// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The provisioning and readiness sequence.
//!
//! Runs the steps in a fixed order, each of them idempotent:
//!
//! 1. install dependencies
//! 2. materialize the env file
//! 3. configure the firewall
//! 4. launch the service
//! 5. wait for readiness
//!
//! Cancellation is checked between steps and during the readiness wait. If
//! the sequence is cancelled after launch, the running containers are logged.

use std::time::Duration;

use kbstack_client::HealthStatus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::DeployContext;
use crate::error::{ProvisionError, Result};
use crate::firewall::{FirewallConfigurator, FirewallPlan, FirewallReport};
use crate::installer::{DependencyInstaller, InstallReport};
use crate::launcher::{ServiceHandle, ServiceLauncher};
use crate::materializer::{CredentialSource, materialize};
use crate::probe::{HealthProbe, ReadinessProber};
use crate::system::System;

/// Which steps to run and how.
#[derive(Debug, Clone, Default)]
pub struct SequenceOptions {
    /// Rebuild images before starting
    pub rebuild: bool,
    /// Overrides the readiness timeout from the env file
    pub timeout: Option<Duration>,
    /// Run the dependency installer
    pub install: bool,
    /// Run the firewall configurator
    pub firewall: bool,
}

impl SequenceOptions {
    /// Every step, from a bare host.
    pub fn full() -> Self {
        Self {
            install: true,
            firewall: true,
            ..Self::default()
        }
    }

    /// Only launch and wait (the host is already provisioned).
    pub fn start_only() -> Self {
        Self::default()
    }

    pub fn with_rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What the sequence did.
#[derive(Debug, Serialize)]
pub struct SequenceReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallReport>,
    pub env_file_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallReport>,
    pub handle: ServiceHandle,
    pub health: HealthStatus,
}

/// Orchestrates the provisioning steps.
pub struct ProvisioningSequence<'a, P> {
    system: &'a dyn System,
    context: &'a DeployContext,
    credentials: &'a dyn CredentialSource,
    prober: &'a ReadinessProber<P>,
}

impl<'a, P: HealthProbe> ProvisioningSequence<'a, P> {
    pub fn new(
        system: &'a dyn System,
        context: &'a DeployContext,
        credentials: &'a dyn CredentialSource,
        prober: &'a ReadinessProber<P>,
    ) -> Self {
        Self {
            system,
            context,
            credentials,
            prober,
        }
    }

    pub async fn run(
        &self,
        options: &SequenceOptions,
        cancel: &CancellationToken,
    ) -> Result<SequenceReport> {
        let install = if options.install {
            check_cancelled(cancel)?;
            info!(step = "install", "Ensuring dependencies");
            let report = DependencyInstaller::new(self.system, self.context.package_manager)
                .ensure(cancel)
                .await?;
            Some(report)
        } else {
            None
        };

        check_cancelled(cancel)?;
        info!(step = "materialize", path = %self.context.env_file.display(), "Materializing env file");
        let materialized = materialize(&self.context.env_file, self.credentials)?;

        let firewall = if options.firewall {
            check_cancelled(cancel)?;
            info!(step = "firewall", "Configuring firewall");
            let plan = FirewallPlan::from_context(self.context);
            Some(FirewallConfigurator::new(self.system, plan).apply(cancel).await?)
        } else {
            None
        };

        check_cancelled(cancel)?;
        info!(step = "launch", rebuild = options.rebuild, "Launching service");
        let launcher = ServiceLauncher::new(self.system, self.context);
        let handle = launcher
            .launch(&materialized.config, options.rebuild)
            .await?;

        let timeout = options
            .timeout
            .unwrap_or_else(|| materialized.config.timeout());
        info!(step = "ready", "Waiting for readiness");
        let health = match self
            .prober
            .await_ready(Some(&handle), &self.context.health_url, timeout, cancel)
            .await
        {
            Ok(health) => health,
            Err(ProvisionError::Cancelled) => {
                warn!(
                    project = %handle.project,
                    containers = ?handle.container_ids,
                    "Cancelled after launch; containers are still running"
                );
                return Err(ProvisionError::Cancelled);
            }
            Err(e) => return Err(e),
        };

        Ok(SequenceReport {
            install,
            env_file_created: materialized.created,
            firewall,
            handle,
            health,
        })
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ProvisionError::Cancelled)
    } else {
        Ok(())
    }
}
