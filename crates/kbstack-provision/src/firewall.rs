// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Firewall configurator.
//!
//! Opens a small allow-list of TCP ports with ufw and only then turns
//! enforcement on. The administrative port always goes first, so enabling
//! the firewall can never cut off the operator's session.

use std::collections::HashSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::DeployContext;
use crate::error::{ProvisionError, Result};
use crate::system::{CommandSpec, System};

const UFW: &str = "ufw";

/// A single TCP allow rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortRule {
    pub port: u16,
    /// Failure to open this port aborts provisioning
    pub required: bool,
}

impl PortRule {
    /// Rule spec as ufw understands it, e.g. `22/tcp`.
    pub fn spec(&self) -> String {
        format!("{}/tcp", self.port)
    }
}

/// Ordered list of ports to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPlan {
    rules: Vec<PortRule>,
}

impl FirewallPlan {
    /// Admin port, service port, then 80 and 443 if requested.
    /// A port listed twice is opened once, with the stricter requirement.
    pub fn new(admin_port: u16, service_port: u16, open_web_ports: bool) -> Self {
        let mut rules: Vec<PortRule> = Vec::new();
        let mut add = |port: u16, required: bool| {
            if let Some(existing) = rules.iter_mut().find(|r| r.port == port) {
                existing.required |= required;
            } else {
                rules.push(PortRule { port, required });
            }
        };
        add(admin_port, true);
        add(service_port, true);
        if open_web_ports {
            add(80, false);
            add(443, false);
        }
        Self { rules }
    }

    pub fn from_context(context: &DeployContext) -> Self {
        Self::new(
            context.admin_port,
            context.service_port,
            context.open_web_ports,
        )
    }

    pub fn rules(&self) -> &[PortRule] {
        &self.rules
    }

    pub fn admin(&self) -> PortRule {
        self.rules[0]
    }
}

/// Extract the TCP ports allowed by `ufw show added`.
///
/// Recognises `ufw allow 22`, `ufw allow 22/tcp`, port lists and ranges such
/// as `80,443/tcp` or `6000:6007/tcp`, and rules followed by a trailing
/// clause like `comment 'ssh'`. Application profiles (`ufw allow OpenSSH`)
/// carry no port and are ignored.
pub fn parse_added_rules(output: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for line in output.lines() {
        let Some(rule) = line.trim().strip_prefix("ufw allow ") else {
            continue;
        };
        let Some(spec) = rule.split_whitespace().next() else {
            continue;
        };
        let (list, proto) = match spec.split_once('/') {
            Some((list, proto)) => (list, Some(proto)),
            None => (spec, None),
        };
        if matches!(proto, Some(p) if p != "tcp") {
            continue;
        }
        for item in list.split(',') {
            match item.split_once(':') {
                Some((low, high)) => {
                    if let (Ok(low), Ok(high)) = (low.parse::<u16>(), high.parse::<u16>()) {
                        ports.extend(low..=high);
                    }
                }
                None => {
                    if let Ok(port) = item.parse::<u16>() {
                        ports.insert(port);
                    }
                }
            }
        }
    }
    ports
}

/// Outcome of a firewall pass.
#[derive(Debug, Default, Serialize)]
pub struct FirewallReport {
    /// Rules that were already present
    pub existing: Vec<u16>,
    /// Rules added during this run
    pub added: Vec<u16>,
    /// Optional ports that could not be opened
    pub warnings: Vec<String>,
    /// Enforcement was turned on during this run
    pub enabled: bool,
}

/// Applies a `FirewallPlan` with ufw.
pub struct FirewallConfigurator<'a> {
    system: &'a dyn System,
    plan: FirewallPlan,
}

impl<'a> FirewallConfigurator<'a> {
    pub fn new(system: &'a dyn System, plan: FirewallPlan) -> Self {
        Self { system, plan }
    }

    pub fn plan(&self) -> &FirewallPlan {
        &self.plan
    }

    /// Open every missing port, then enable enforcement if it is off.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<FirewallReport> {
        if !self.system.is_available(UFW) {
            return Err(ProvisionError::FirewallConfigFailed(
                "ufw is not installed".to_string(),
            ));
        }

        let mut present = self.added_rules().await?;
        let mut report = FirewallReport::default();

        for rule in self.plan.rules() {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            if present.contains(&rule.port) {
                report.existing.push(rule.port);
                continue;
            }

            let allow = CommandSpec::new(UFW).args(["allow".to_string(), rule.spec()]);
            match self.system.checked(&allow).await {
                Ok(_) => {
                    info!(port = rule.port, "Firewall rule added");
                    present.insert(rule.port);
                    report.added.push(rule.port);
                }
                Err(e) if rule.required => {
                    return Err(ProvisionError::FirewallConfigFailed(format!(
                        "could not open port {}: {}",
                        rule.port, e
                    )));
                }
                Err(e) => {
                    warn!(port = rule.port, error = %e, "Could not open optional port");
                    report
                        .warnings
                        .push(format!("port {} not opened: {}", rule.port, e));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        if !present.contains(&self.plan.admin().port) {
            return Err(ProvisionError::FirewallConfigFailed(format!(
                "admin port {} is not allowed; refusing to enable the firewall",
                self.plan.admin().port
            )));
        }

        if !self.is_active().await? {
            let enable = CommandSpec::new(UFW).args(["--force", "enable"]);
            self.system
                .checked(&enable)
                .await
                .map_err(|e| ProvisionError::FirewallConfigFailed(e.to_string()))?;
            info!("Firewall enabled");
            report.enabled = true;
        }

        Ok(report)
    }

    async fn added_rules(&self) -> Result<HashSet<u16>> {
        let show = CommandSpec::new(UFW).args(["show", "added"]);
        let output = self
            .system
            .checked(&show)
            .await
            .map_err(|e| ProvisionError::FirewallConfigFailed(e.to_string()))?;
        Ok(parse_added_rules(&output.stdout))
    }

    async fn is_active(&self) -> Result<bool> {
        let status = CommandSpec::new(UFW).arg("status");
        let output = self
            .system
            .checked(&status)
            .await
            .map_err(|e| ProvisionError::FirewallConfigFailed(e.to_string()))?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case("status: active")))
    }
}
