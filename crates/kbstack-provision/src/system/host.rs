// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host system implementation.
//!
//! Spawns real processes with tokio. Commands are never interrupted midway:
//! cancellation is honoured by callers between commands, so a package
//! install or a compose call always finishes.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::traits::{CommandOutput, CommandSpec, Result, System, SystemError};

/// Executes commands on the local host.
#[derive(Debug, Default, Clone)]
pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn spawn_error(spec: &CommandSpec, err: std::io::Error) -> SystemError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SystemError::NotFound(spec.program.clone())
    } else {
        SystemError::Io(err)
    }
}

#[async_trait]
impl System for HostSystem {
    fn system_type(&self) -> &'static str {
        "host"
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Running command");
        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(spec, e))?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %spec, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }

    async fn attached(&self, spec: &CommandSpec) -> Result<i32> {
        debug!(command = %spec, "Running attached command");
        let status = Self::command(spec)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| spawn_error(spec, e))?;
        Ok(status.code().unwrap_or(-1))
    }
}
