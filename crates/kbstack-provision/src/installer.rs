// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency installer.
//!
//! Makes sure the container runtime, compose, the firewall tool and a few
//! auxiliary tools are present, and that the Docker daemon is running.
//! Presence is decided by PATH probes, so a second run installs nothing.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ProvisionError, Result};
use crate::system::{CommandSpec, System};

/// Host package manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian / Ubuntu
    #[default]
    Apt,
    /// Fedora / RHEL
    Dnf,
}

impl PackageManager {
    fn program(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
        }
    }

    fn refresh_command(&self) -> CommandSpec {
        let spec = CommandSpec::new(self.program());
        match self {
            PackageManager::Apt => spec
                .arg("update")
                .env("DEBIAN_FRONTEND", "noninteractive"),
            PackageManager::Dnf => spec.arg("makecache"),
        }
    }

    fn install_command(&self, package: &str) -> CommandSpec {
        let spec = CommandSpec::new(self.program()).args(["install", "-y", package]);
        match self {
            PackageManager::Apt => spec.env("DEBIAN_FRONTEND", "noninteractive"),
            PackageManager::Dnf => spec,
        }
    }

    /// Package providing Docker on this distribution.
    fn docker_package(&self) -> &'static str {
        match self {
            PackageManager::Apt => "docker.io",
            PackageManager::Dnf => "docker-ce",
        }
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageManager::Apt => write!(f, "apt"),
            PackageManager::Dnf => write!(f, "dnf"),
        }
    }
}

impl std::str::FromStr for PackageManager {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apt" | "apt-get" => Ok(PackageManager::Apt),
            "dnf" | "yum" => Ok(PackageManager::Dnf),
            _ => Err(format!("Unknown package manager: {}", s)),
        }
    }
}

/// Which compose flavour is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeTool {
    /// `docker-compose` binary (v1 or the standalone v2 build)
    Standalone,
    /// `docker compose` CLI plugin
    Plugin,
}

impl ComposeTool {
    /// Prefer the standalone binary, fall back to the plugin.
    pub async fn detect(system: &dyn System) -> Option<Self> {
        if system.is_available("docker-compose") {
            return Some(ComposeTool::Standalone);
        }
        if !system.is_available("docker") {
            return None;
        }
        let probe = CommandSpec::new("docker").args(["compose", "version"]);
        match system.output(&probe).await {
            Ok(output) if output.success() => Some(ComposeTool::Plugin),
            _ => None,
        }
    }

    /// Base command, before any compose arguments.
    pub fn command(&self) -> CommandSpec {
        match self {
            ComposeTool::Standalone => CommandSpec::new("docker-compose"),
            ComposeTool::Plugin => CommandSpec::new("docker").arg("compose"),
        }
    }
}

/// A tool the deployment relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name used in logs and reports
    pub name: String,
    /// Binary probed on PATH
    pub binary: String,
    /// Package that provides the binary
    pub package: String,
    /// Failure to install aborts the sequence
    pub required: bool,
}

impl Dependency {
    pub fn required(name: &str, binary: &str, package: &str) -> Self {
        Self {
            name: name.to_string(),
            binary: binary.to_string(),
            package: package.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, binary: &str, package: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, binary, package)
        }
    }
}

/// Dependencies for the given package manager, required ones first.
pub fn default_dependencies(pm: PackageManager) -> Vec<Dependency> {
    vec![
        Dependency::required("docker", "docker", pm.docker_package()),
        Dependency::required("docker-compose", "docker-compose", "docker-compose"),
        Dependency::required("ufw", "ufw", "ufw"),
        Dependency::optional("curl", "curl", "curl"),
        Dependency::optional("htop", "htop", "htop"),
        Dependency::optional("gcloud", "gcloud", "google-cloud-cli"),
    ]
}

/// Outcome of a dependency pass.
#[derive(Debug, Default, Serialize)]
pub struct InstallReport {
    /// Already on PATH, nothing done
    pub already_present: Vec<String>,
    /// Installed during this run
    pub installed: Vec<String>,
    /// Optional dependencies that failed (logged, not fatal)
    #[serde(skip)]
    pub optional_failures: Vec<ProvisionError>,
    /// Compose flavour found after installation
    pub compose: Option<ComposeTool>,
    /// The Docker daemon had to be started
    pub started_docker: bool,
}

impl InstallReport {
    /// Nothing was installed or started.
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty() && !self.started_docker
    }
}

/// Ensures dependencies are installed.
pub struct DependencyInstaller<'a> {
    system: &'a dyn System,
    package_manager: PackageManager,
    dependencies: Vec<Dependency>,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(system: &'a dyn System, package_manager: PackageManager) -> Self {
        Self {
            system,
            package_manager,
            dependencies: default_dependencies(package_manager),
        }
    }

    /// Replace the dependency list.
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Install what is missing and make sure the Docker daemon is active.
    pub async fn ensure(&self, cancel: &CancellationToken) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        let mut missing = Vec::new();

        for dep in &self.dependencies {
            if self.is_satisfied(dep).await {
                report.already_present.push(dep.name.clone());
            } else {
                missing.push(dep);
            }
        }

        if !missing.is_empty() {
            info!(
                missing = ?missing.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                package_manager = %self.package_manager,
                "Installing missing dependencies"
            );
            self.refresh_index(&missing, cancel).await?;
        }

        for dep in missing {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            match self.install(dep).await {
                Ok(()) => {
                    info!(dependency = %dep.name, package = %dep.package, "Installed");
                    report.installed.push(dep.name.clone());
                }
                Err(reason) if dep.required => {
                    return Err(ProvisionError::DependencyInstallFailed {
                        name: dep.name.clone(),
                        reason,
                    });
                }
                Err(reason) => {
                    warn!(dependency = %dep.name, reason = %reason, "Optional dependency not installed");
                    report
                        .optional_failures
                        .push(ProvisionError::OptionalDependencyFailed {
                            name: dep.name.clone(),
                            reason,
                        });
                }
            }
        }

        report.compose = ComposeTool::detect(self.system).await;
        if self.requires("docker") {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            report.started_docker = self.ensure_docker_active().await?;
        }

        Ok(report)
    }

    fn requires(&self, name: &str) -> bool {
        self.dependencies
            .iter()
            .any(|d| d.name == name && d.required)
    }

    async fn is_satisfied(&self, dep: &Dependency) -> bool {
        if self.system.is_available(&dep.binary) {
            return true;
        }
        // The compose plugin satisfies the compose requirement.
        dep.name == "docker-compose"
            && ComposeTool::detect(self.system).await == Some(ComposeTool::Plugin)
    }

    /// Refresh the package index once. Fatal only if a required dependency
    /// is waiting on it.
    async fn refresh_index(&self, missing: &[&Dependency], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        let command = self.package_manager.refresh_command();
        if let Err(e) = self.system.checked(&command).await {
            if let Some(dep) = missing.iter().find(|d| d.required) {
                return Err(ProvisionError::DependencyInstallFailed {
                    name: dep.name.clone(),
                    reason: format!("package index refresh failed: {}", e),
                });
            }
            warn!(error = %e, "Package index refresh failed");
        }
        Ok(())
    }

    async fn install(&self, dep: &Dependency) -> std::result::Result<(), String> {
        let command = self.package_manager.install_command(&dep.package);
        self.system
            .checked(&command)
            .await
            .map_err(|e| e.to_string())?;
        if self.is_satisfied(dep).await {
            Ok(())
        } else {
            Err(format!(
                "package {} installed but `{}` is still not on PATH",
                dep.package, dep.binary
            ))
        }
    }

    /// Returns true when the daemon had to be started.
    async fn ensure_docker_active(&self) -> Result<bool> {
        let probe = CommandSpec::new("systemctl").args(["is-active", "--quiet", "docker"]);
        if let Ok(output) = self.system.output(&probe).await
            && output.success()
        {
            return Ok(false);
        }

        info!("Starting Docker daemon");
        let start = CommandSpec::new("systemctl").args(["enable", "--now", "docker"]);
        self.system
            .checked(&start)
            .await
            .map_err(|e| ProvisionError::DependencyInstallFailed {
                name: "docker daemon".to_string(),
                reason: e.to_string(),
            })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_manager_parse() {
        assert_eq!("apt".parse::<PackageManager>().unwrap(), PackageManager::Apt);
        assert_eq!("DNF".parse::<PackageManager>().unwrap(), PackageManager::Dnf);
        assert!("brew".parse::<PackageManager>().is_err());
    }

    #[test]
    fn test_default_dependencies_required_first() {
        let deps = default_dependencies(PackageManager::Apt);
        let first_optional = deps.iter().position(|d| !d.required).unwrap();
        assert!(deps[first_optional..].iter().all(|d| !d.required));
        assert_eq!(deps[0].package, "docker.io");
        assert_eq!(default_dependencies(PackageManager::Dnf)[0].package, "docker-ce");
    }

    #[test]
    fn test_compose_command() {
        assert_eq!(ComposeTool::Standalone.command().to_string(), "docker-compose");
        assert_eq!(ComposeTool::Plugin.command().to_string(), "docker compose");
    }
}
