// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service launcher.
//!
//! Drives the compose project that runs the knowledge service. Credentials
//! reach the containers through the compose process environment, never
//! through the command line.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProvisioningConfig;
use crate::context::DeployContext;
use crate::error::{ProvisionError, Result};
use crate::installer::ComposeTool;
use crate::system::{CommandSpec, System};

/// Reference to a running compose project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHandle {
    /// Compose project name
    pub project: String,
    /// Running container ids, never empty
    pub container_ids: Vec<String>,
    /// When the handle was resolved
    pub started_at: DateTime<Utc>,
}

/// Starts, stops and inspects the compose project.
pub struct ServiceLauncher<'a> {
    system: &'a dyn System,
    context: &'a DeployContext,
}

impl<'a> ServiceLauncher<'a> {
    pub fn new(system: &'a dyn System, context: &'a DeployContext) -> Self {
        Self { system, context }
    }

    /// Bring the service up and resolve its containers.
    pub async fn launch(&self, config: &ProvisioningConfig, rebuild: bool) -> Result<ServiceHandle> {
        let compose = self.compose().await?;
        let env = config.service_env();

        info!(
            project = %self.context.project_name,
            rebuild,
            vector_db_url = %config.vector_db_url(),
            vector_db_api_key = %config.vector_db_api_key(),
            "Launching service"
        );

        if rebuild {
            let build = self
                .base(compose)
                .args(["build", "--pull"])
                .envs(env.clone());
            self.system
                .checked(&build)
                .await
                .map_err(|e| ProvisionError::LaunchFailed(e.to_string()))?;
        }

        let mut up = self.base(compose).args(["up", "-d"]);
        if rebuild {
            up = up.arg("--build");
        }
        self.system
            .checked(&up.envs(env))
            .await
            .map_err(|e| ProvisionError::LaunchFailed(e.to_string()))?;

        match self.current_handle().await? {
            Some(handle) => {
                info!(
                    project = %handle.project,
                    containers = ?handle.container_ids,
                    "Service started"
                );
                Ok(handle)
            }
            None => Err(ProvisionError::LaunchFailed(format!(
                "compose reported success but project {} has no running containers",
                self.context.project_name
            ))),
        }
    }

    /// Handle for the running project, if any container is up.
    pub async fn current_handle(&self) -> Result<Option<ServiceHandle>> {
        let ps = CommandSpec::new("docker").args([
            "ps".to_string(),
            "-q".to_string(),
            "--filter".to_string(),
            format!("label=com.docker.compose.project={}", self.context.project_name),
        ]);
        let output = self.system.checked(&ps).await?;
        let container_ids: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        debug!(project = %self.context.project_name, containers = container_ids.len(), "Resolved containers");
        if container_ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(ServiceHandle {
            project: self.context.project_name.clone(),
            container_ids,
            started_at: Utc::now(),
        }))
    }

    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.current_handle().await?.is_some())
    }

    /// Stop and remove the project's containers.
    pub async fn stop(&self) -> Result<()> {
        let compose = self.compose().await?;
        self.system.checked(&self.base(compose).arg("down")).await?;
        info!(project = %self.context.project_name, "Service stopped");
        Ok(())
    }

    /// Restart running containers in place.
    pub async fn restart(&self) -> Result<ServiceHandle> {
        if !self.is_running().await? {
            return Err(ProvisionError::ServiceNotRunning);
        }
        let compose = self.compose().await?;
        self.system
            .checked(&self.base(compose).arg("restart"))
            .await?;
        info!(project = %self.context.project_name, "Service restarted");
        self.current_handle()
            .await?
            .ok_or(ProvisionError::ServiceNotRunning)
    }

    /// Stream logs to the operator's terminal. Returns the compose exit code.
    pub async fn logs(&self, follow: bool, tail: Option<u32>) -> Result<i32> {
        let compose = self.compose().await?;
        let mut logs = self.base(compose).arg("logs");
        if follow {
            logs = logs.arg("--follow");
        }
        if let Some(tail) = tail {
            logs = logs.args(["--tail".to_string(), tail.to_string()]);
        }
        Ok(self.system.attached(&logs).await?)
    }

    async fn compose(&self) -> Result<ComposeTool> {
        ComposeTool::detect(self.system).await.ok_or_else(|| {
            ProvisionError::LaunchFailed(
                "neither docker-compose nor the docker compose plugin is available".to_string(),
            )
        })
    }

    fn base(&self, compose: ComposeTool) -> CommandSpec {
        compose
            .command()
            .arg("-f")
            .arg(self.context.compose_file.to_string_lossy())
            .args(["-p", self.context.project_name.as_str()])
            .current_dir(&self.context.project_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MockSystem;

    fn config() -> ProvisioningConfig {
        ProvisioningConfig::new("https://vectors.example.com:6333", "sk-test-0123456789abcdef")
            .unwrap()
            .with_debug(false)
    }

    #[tokio::test]
    async fn test_launch_injects_credentials_via_env() {
        let system = MockSystem::provisioned();
        let context = DeployContext::for_project("/srv/kb");
        let launcher = ServiceLauncher::new(&system, &context);

        let handle = launcher.launch(&config(), false).await.unwrap();
        assert_eq!(handle.project, "kb");
        assert_eq!(handle.container_ids, system.containers());

        let up = system.last_compose_up().unwrap();
        assert_eq!(up.env_value("VECTOR_DB_URL"), Some("https://vectors.example.com:6333"));
        assert_eq!(up.env_value("VECTOR_DB_API_KEY"), Some("sk-test-0123456789abcdef"));
        assert_eq!(up.env_value("DEBUG"), Some("false"));
        assert!(!up.to_string().contains("sk-test"));
        assert!(!up.args.contains(&"--build".to_string()));
    }

    #[tokio::test]
    async fn test_rebuild_pulls_then_builds() {
        let system = MockSystem::provisioned();
        let context = DeployContext::for_project("/srv/kb");
        let launcher = ServiceLauncher::new(&system, &context);
        launcher.launch(&config(), true).await.unwrap();

        let lines = system.command_lines("docker-compose");
        assert!(lines[0].ends_with("build --pull"));
        assert!(lines[1].ends_with("up -d --build"));
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let system = MockSystem::provisioned().with_compose_up_failure();
        let context = DeployContext::for_project("/srv/kb");
        let err = ServiceLauncher::new(&system, &context)
            .launch(&config(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::LaunchFailed(_)));
    }

    #[tokio::test]
    async fn test_plugin_flavour_and_stop() {
        let system = MockSystem::provisioned()
            .without_binary("docker-compose")
            .with_compose_plugin();
        let context = DeployContext::for_project("/srv/kb");
        let launcher = ServiceLauncher::new(&system, &context);
        launcher.launch(&config(), false).await.unwrap();
        assert!(system.last_compose_up().unwrap().to_string().starts_with("docker compose -f"));

        launcher.stop().await.unwrap();
        assert!(launcher.current_handle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_requires_running_service() {
        let system = MockSystem::provisioned();
        let context = DeployContext::for_project("/srv/kb");
        let launcher = ServiceLauncher::new(&system, &context);
        let err = launcher.restart().await.unwrap_err();
        assert!(matches!(err, ProvisionError::ServiceNotRunning));
    }
}
