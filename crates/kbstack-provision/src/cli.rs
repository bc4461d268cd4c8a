// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator command line.
//!
//! Usage:
//!   kbstack [--project-dir <dir>] [--timeout <secs>] <command>
//!
//! Commands:
//!   provision [--rebuild]          Full sequence on a bare host
//!   start [--rebuild]              Launch and wait for readiness
//!   stop                           Stop the service
//!   restart                        Restart and wait for readiness
//!   status                         Probe once, print health as JSON
//!   logs [--follow] [--tail <n>]   Show service logs
//!   config                         Materialize the env file only

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{DEFAULT_TIMEOUT_SECONDS, ProvisioningConfig};
use crate::context::DeployContext;
use crate::error::{ProvisionError, Result};
use crate::launcher::ServiceLauncher;
use crate::materializer::{CredentialSource, materialize};
use crate::probe::{HealthProbe, ReadinessProber, require_ready};
use crate::sequence::{ProvisioningSequence, SequenceOptions};
use crate::system::{CommandSpec, System, SystemError};

/// Hint printed after every fatal error.
pub const LOGS_HINT: &str = "Inspect logs with: kbstack logs --tail 100";

#[derive(Debug, Parser)]
#[command(name = "kbstack", version, about = "Provision and operate the knowledge service")]
pub struct Cli {
    /// Directory holding docker-compose.yml and .env
    #[arg(long, global = true, env = "KBSTACK_PROJECT_DIR", value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Readiness timeout in seconds (default: TIMEOUT_SECONDS from the env file, else 300)
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Install dependencies, write the env file, configure the firewall, start and verify
    Provision {
        /// Rebuild images (pulling base images) before starting
        #[arg(long)]
        rebuild: bool,
    },
    /// Start the service and wait until it is ready
    Start {
        /// Rebuild images (pulling base images) before starting
        #[arg(long)]
        rebuild: bool,
    },
    /// Stop the service
    Stop,
    /// Restart the service and wait until it is ready
    Restart,
    /// Probe the health endpoint once and print the result as JSON
    Status,
    /// Show service logs
    Logs {
        /// Keep streaming new log lines
        #[arg(long, short)]
        follow: bool,
        /// Number of lines to show from the end of the logs
        #[arg(long, value_name = "N")]
        tail: Option<u32>,
    },
    /// Write the env file if it does not exist yet
    Config,
}

impl Cli {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Everything a command needs, built once in `main`.
pub struct Operator<'a, P> {
    pub system: &'a dyn System,
    pub context: &'a DeployContext,
    pub credentials: &'a dyn CredentialSource,
    pub prober: &'a ReadinessProber<P>,
}

impl<'a, P: HealthProbe> Operator<'a, P> {
    pub async fn execute(
        &self,
        command: Command,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match command {
            Command::Provision { rebuild } => {
                let options = SequenceOptions::full()
                    .with_rebuild(rebuild)
                    .with_timeout(timeout);
                self.run_sequence(&options, cancel).await
            }
            Command::Start { rebuild } => {
                let options = SequenceOptions::start_only()
                    .with_rebuild(rebuild)
                    .with_timeout(timeout);
                self.run_sequence(&options, cancel).await
            }
            Command::Stop => {
                self.launcher().stop().await?;
                println!("Service stopped");
                Ok(())
            }
            Command::Restart => {
                let handle = self.launcher().restart().await?;
                let timeout = match timeout {
                    Some(timeout) => timeout,
                    None => self.configured_timeout()?,
                };
                let health = self
                    .prober
                    .await_ready(Some(&handle), &self.context.health_url, timeout, cancel)
                    .await?;
                report_health(&health);
                Ok(())
            }
            Command::Status => {
                let handle = self.launcher().current_handle().await?;
                let health = self
                    .prober
                    .probe_once(handle.as_ref(), &self.context.health_url)
                    .await?;
                print_json(&health)?;
                if health.status == kbstack_client::ServiceState::Unreachable {
                    return Err(ProvisionError::ServiceUnreachable {
                        endpoint: self.context.health_url.to_string(),
                        attempts: 1,
                        last_error: health.detail,
                    });
                }
                Ok(())
            }
            Command::Logs { follow, tail } => self.logs(follow, tail, cancel).await,
            Command::Config => {
                let materialized = materialize(&self.context.env_file, self.credentials)?;
                let verb = if materialized.created {
                    "written"
                } else {
                    "already present"
                };
                println!("Env file {}: {}", verb, self.context.env_file.display());
                println!("  VECTOR_DB_URL={}", materialized.config.vector_db_url());
                println!(
                    "  VECTOR_DB_API_KEY={}",
                    materialized.config.vector_db_api_key()
                );
                Ok(())
            }
        }
    }

    async fn run_sequence(
        &self,
        options: &SequenceOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sequence =
            ProvisioningSequence::new(self.system, self.context, self.credentials, self.prober);
        let report = sequence.run(options, cancel).await?;

        if let Some(install) = &report.install {
            for failure in &install.optional_failures {
                eprintln!("warning: {}", failure);
            }
        }
        if let Some(firewall) = &report.firewall {
            for warning in &firewall.warnings {
                eprintln!("warning: {}", warning);
            }
        }
        println!(
            "Service {} running ({} container(s))",
            report.handle.project,
            report.handle.container_ids.len()
        );
        report_health(&report.health);
        Ok(())
    }

    async fn logs(&self, follow: bool, tail: Option<u32>, cancel: &CancellationToken) -> Result<()> {
        let launcher = self.launcher();
        let exit_code = tokio::select! {
            // Dropping the attached child kills it.
            _ = cancel.cancelled() => return Ok(()),
            code = launcher.logs(follow, tail) => code?,
        };
        if exit_code != 0 {
            return Err(SystemError::ExitCode {
                command: CommandSpec::new("compose").arg("logs").to_string(),
                exit_code,
                stderr: String::new(),
            }
            .into());
        }
        Ok(())
    }

    fn launcher(&self) -> ServiceLauncher<'_> {
        ServiceLauncher::new(self.system, self.context)
    }

    /// Readiness timeout from the env file, if it exists.
    fn configured_timeout(&self) -> Result<Duration> {
        if self.context.env_file.exists() {
            Ok(ProvisioningConfig::load(&self.context.env_file)?.timeout())
        } else {
            Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
        }
    }
}

/// Print the readiness result. A degraded service is a warning, not a failure.
fn report_health(health: &kbstack_client::HealthStatus) {
    match require_ready(health.clone()) {
        Ok(health) => {
            info!(version = %health.version, "Service ready");
            println!("Service ready (version {})", display_version(&health.version));
        }
        Err(e) => eprintln!("warning: {}", e),
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() { "unknown" } else { version }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ProvisionError::InvalidConfig(format!("cannot render JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Lines printed to stderr for a fatal error.
pub fn diagnostic(err: &ProvisionError) -> String {
    match err {
        ProvisionError::Cancelled => format!("error: {}", err),
        _ => format!("error: {}\n{}", err, LOGS_HINT),
    }
}
