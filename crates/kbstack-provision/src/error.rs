// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kbstack-provision.

use thiserror::Error;

/// Exit code for generic failures.
pub const EXIT_FAILURE: u8 = 1;

/// Exit code reserved for missing credentials, so automation can tell
/// configuration errors from runtime errors.
pub const EXIT_MISSING_CREDENTIAL: u8 = 2;

/// Provisioning errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// Deploy context could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::context::ConfigError),

    /// A required secret is empty after solicitation.
    #[error("Missing credential: {0} must be set and non-empty")]
    MissingCredential(&'static str),

    /// A credential or config value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required package or tool could not be installed.
    #[error("Failed to install required dependency {name}: {reason}")]
    DependencyInstallFailed {
        /// Dependency name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// A non-required tool failed to install. Reported, never propagated.
    #[error("Optional dependency {name} not installed: {reason}")]
    OptionalDependencyFailed {
        /// Dependency name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// Firewall tool missing or a required rule could not be applied.
    #[error("Firewall configuration failed: {0}")]
    FirewallConfigFailed(String),

    /// Compose could not bring the service up.
    #[error("Service launch failed: {0}")]
    LaunchFailed(String),

    /// No running containers for the compose project.
    #[error("Service is not running")]
    ServiceNotRunning,

    /// Readiness timeout elapsed without a single successful HTTP response.
    #[error("Service unreachable at {endpoint} after {attempts} probes{}", last_error_suffix(.last_error))]
    ServiceUnreachable {
        /// Health endpoint that was probed.
        endpoint: String,
        /// Number of probes issued.
        attempts: u32,
        /// Last transport error observed.
        last_error: Option<String>,
    },

    /// The service answered but never reported ready.
    #[error("Service degraded: reported '{status}' (version {version})")]
    ServiceDegraded {
        /// Raw status reported by the service.
        status: String,
        /// Reported version.
        version: String,
    },

    /// An external command failed.
    #[error("System error: {0}")]
    System(#[from] crate::system::SystemError),

    /// Cancelled by the operator (Ctrl-C) or the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service client failed.
    #[error("Client error: {0}")]
    Client(#[from] kbstack_client::ClientError),
}

impl ProvisionError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::MissingCredential(_) => EXIT_MISSING_CREDENTIAL,
            _ => EXIT_FAILURE,
        }
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

/// Result type using ProvisionError.
pub type Result<T> = std::result::Result<T, ProvisionError>;
