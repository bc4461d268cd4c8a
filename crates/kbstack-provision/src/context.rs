// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deploy context for kbstack.
//!
//! Every component receives the context explicitly; nothing below `main`
//! reads the process environment or the working directory on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::config::parse_bool;
use crate::installer::PackageManager;

/// Where and how the service is deployed on this host.
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Directory holding the compose file and the env file
    pub project_dir: PathBuf,
    /// Persisted credentials (dotenv syntax)
    pub env_file: PathBuf,
    /// Compose service definition
    pub compose_file: PathBuf,
    /// Compose project name (`-p`)
    pub project_name: String,
    /// Administrative access port, always opened first
    pub admin_port: u16,
    /// Port the service listens on
    pub service_port: u16,
    /// Also open 80 and 443
    pub open_web_ports: bool,
    /// Health endpoint polled by the readiness prober
    pub health_url: Url,
    /// Pause between readiness probes
    pub probe_interval: Duration,
    /// Timeout of a single readiness probe
    pub probe_timeout: Duration,
    /// Host package manager
    pub package_manager: PackageManager,
}

impl DeployContext {
    /// Context with defaults for a project directory.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let service_port = 8000;
        Self {
            env_file: project_dir.join(".env"),
            compose_file: project_dir.join("docker-compose.yml"),
            project_name: default_project_name(&project_dir),
            project_dir,
            admin_port: 22,
            service_port,
            open_web_ports: true,
            health_url: local_health_url(service_port),
            probe_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            package_manager: PackageManager::Apt,
        }
    }

    /// Load the context from `KBSTACK_*` environment variables.
    ///
    /// `cwd` is used when `KBSTACK_PROJECT_DIR` is unset.
    pub fn from_env(cwd: &Path) -> Result<Self, ConfigError> {
        Self::from_lookup(cwd, |key| std::env::var(key).ok())
    }

    /// Load the context through an arbitrary variable lookup.
    pub fn from_lookup<F>(cwd: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = lookup("KBSTACK_PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.to_path_buf());
        let mut context = Self::for_project(project_dir);

        if let Some(path) = lookup("KBSTACK_ENV_FILE") {
            context.env_file = context.project_dir.join(path);
        }
        if let Some(path) = lookup("KBSTACK_COMPOSE_FILE") {
            context.compose_file = context.project_dir.join(path);
        }
        if let Some(name) = lookup("KBSTACK_PROJECT_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    var: "KBSTACK_PROJECT_NAME",
                    reason: "must not be empty".to_string(),
                });
            }
            context.project_name = name.trim().to_string();
        }
        if let Some(port) = lookup("KBSTACK_ADMIN_PORT") {
            context.admin_port = parse_port("KBSTACK_ADMIN_PORT", &port)?;
        }
        if let Some(port) = lookup("KBSTACK_SERVICE_PORT") {
            context.service_port = parse_port("KBSTACK_SERVICE_PORT", &port)?;
            context.health_url = local_health_url(context.service_port);
        }
        if let Some(flag) = lookup("KBSTACK_OPEN_WEB_PORTS") {
            context.open_web_ports = parse_bool(&flag);
        }
        if let Some(url) = lookup("KBSTACK_HEALTH_URL") {
            context.health_url = Url::parse(url.trim()).map_err(|e| ConfigError::InvalidValue {
                var: "KBSTACK_HEALTH_URL",
                reason: e.to_string(),
            })?;
        }
        if let Some(ms) = lookup("KBSTACK_PROBE_INTERVAL_MS") {
            context.probe_interval = parse_millis("KBSTACK_PROBE_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("KBSTACK_PROBE_TIMEOUT_MS") {
            context.probe_timeout = parse_millis("KBSTACK_PROBE_TIMEOUT_MS", &ms)?;
        }
        if let Some(pm) = lookup("KBSTACK_PACKAGE_MANAGER") {
            context.package_manager =
                pm.parse().map_err(|reason| ConfigError::InvalidValue {
                    var: "KBSTACK_PACKAGE_MANAGER",
                    reason,
                })?;
        }

        Ok(context)
    }

    /// Set the service port. The health URL follows unless it was customized.
    pub fn with_service_port(mut self, port: u16) -> Self {
        if self.health_url == local_health_url(self.service_port) {
            self.health_url = local_health_url(port);
        }
        self.service_port = port;
        self
    }

    pub fn with_health_url(mut self, url: Url) -> Self {
        self.health_url = url;
        self
    }

    pub fn with_open_web_ports(mut self, open: bool) -> Self {
        self.open_web_ports = open;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

fn local_health_url(port: u16) -> Url {
    // Always parses: fixed scheme and host, numeric port
    Url::parse(&format!("http://127.0.0.1:{}/health", port)).unwrap()
}

/// Compose lowercases project names and only keeps `[a-z0-9_-]`.
fn default_project_name(dir: &Path) -> String {
    let name: String = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if name.is_empty() {
        "kbstack".to_string()
    } else {
        name
    }
}

fn parse_port(var: &'static str, raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(var)),
        Ok(port) => Ok(port),
    }
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            var,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(e) => Err(ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number in {0}")]
    InvalidPort(&'static str),
    /// A variable is present but cannot be used.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
