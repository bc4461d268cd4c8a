// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! System trait definitions.
//!
//! Defines the abstract interface to the host: PATH probes and external
//! commands (package manager, systemctl, ufw, docker, compose).

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from system operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SystemError {
    /// Program is not on PATH.
    #[error("Program not found: {0}")]
    NotFound(String),

    /// Process exited with non-zero code.
    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    ExitCode {
        /// Command line (without environment).
        command: String,
        /// Exit code from the process (-1 when killed by a signal).
        exit_code: i32,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for system operations.
pub type Result<T> = std::result::Result<T, SystemError>;

/// An external command to run.
///
/// Environment variables are applied on top of the inherited environment.
/// They are never included in `Display`, since they may carry secrets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Look up an injected environment variable.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `SystemError::ExitCode`.
    pub fn check(self, command: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SystemError::ExitCode {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Trait for host access.
///
/// Implementations are pure executors: they never decide what to run.
/// Idempotence and ordering live in the callers.
#[async_trait]
pub trait System: Send + Sync {
    /// System type identifier (e.g., "host", "mock")
    fn system_type(&self) -> &'static str;

    /// Whether `program` resolves on PATH.
    fn is_available(&self, program: &str) -> bool;

    /// Run a command to completion and capture its output.
    ///
    /// A non-zero exit is not an error here; see `CommandOutput::check`.
    async fn output(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Run a command attached to the operator's terminal and return its exit code.
    async fn attached(&self, command: &CommandSpec) -> Result<i32>;

    /// Run a command and fail on a non-zero exit.
    async fn checked(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.output(command).await?.check(command)
    }
}
