// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kbstack Provision
//!
//! Takes a bare VM to a verified-running knowledge service, and keeps doing
//! the right thing when run again.
//!
//! # Architecture
//!
//! ```text
//! ProvisioningSequence
//!   ├── DependencyInstaller   docker, compose, ufw, monitoring tools
//!   ├── materialize()         .env with vector database credentials
//!   ├── FirewallConfigurator  admin port first, then service and web ports
//!   ├── ServiceLauncher       compose up, container handle
//!   └── ReadinessProber       polls /health until ready or timeout
//! ```
//!
//! All host access goes through the [`system::System`] trait, so every step
//! can run against [`system::MockSystem`] in tests.
//!
//! # Example
//!
//! ```no_run
//! use kbstack_client::{ClientConfig, ServiceClient};
//! use kbstack_provision::{
//!     DeployContext, EnvSource, ProvisioningSequence, ReadinessProber, SequenceOptions,
//!     system::HostSystem,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = DeployContext::for_project("/srv/kb");
//! let client = ServiceClient::new(
//!     ClientConfig::default().with_request_timeout(context.probe_timeout),
//! )?;
//! let prober = ReadinessProber::new(client, context.probe_interval);
//! let system = HostSystem::new();
//! let credentials = EnvSource::from_process_env();
//!
//! let report = ProvisioningSequence::new(&system, &context, &credentials, &prober)
//!     .run(&SequenceOptions::full(), &CancellationToken::new())
//!     .await?;
//! println!("service is {}", report.health.status);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod context;
mod error;
pub mod firewall;
pub mod installer;
pub mod launcher;
pub mod materializer;
pub mod probe;
pub mod sequence;
pub mod system;

pub use config::{ApiKey, ProvisioningConfig};
pub use context::{ConfigError, DeployContext};
pub use error::{EXIT_FAILURE, EXIT_MISSING_CREDENTIAL, ProvisionError, Result};
pub use firewall::{FirewallConfigurator, FirewallPlan, FirewallReport};
pub use installer::{ComposeTool, DependencyInstaller, InstallReport, PackageManager};
pub use launcher::{ServiceHandle, ServiceLauncher};
pub use materializer::{
    ChainSource, CredentialSource, EnvSource, Materialized, PromptSource, materialize,
};
pub use probe::{HealthProbe, ProbeOutcome, ReadinessProber, ScriptedProbe, require_ready};
pub use sequence::{ProvisioningSequence, SequenceOptions, SequenceReport};
