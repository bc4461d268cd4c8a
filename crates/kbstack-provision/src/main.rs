// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kbstack - provision and operate the knowledge service.
//!
//! Exit codes: 0 success (including a degraded service), 1 failure,
//! 2 missing credentials.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use kbstack_client::{ClientConfig, ServiceClient};
use kbstack_provision::cli::{Cli, Operator, diagnostic};
use kbstack_provision::config::LOG_LEVEL;
use kbstack_provision::system::{HostSystem, System};
use kbstack_provision::{
    ChainSource, DeployContext, EnvSource, ProvisionError, PromptSource, ReadinessProber,
};

const DEFAULT_FILTER: &str = "kbstack_provision=info,kbstack_client=info";

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", diagnostic(&e));
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), ProvisionError> {
    let cwd = match &cli.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    // --project-dir (or its env var) was already resolved by clap
    let context = DeployContext::from_lookup(&cwd, |key| match key {
        "KBSTACK_PROJECT_DIR" => None,
        _ => std::env::var(key).ok(),
    })?;

    if let Err(e) = init_tracing(&context.env_file) {
        eprintln!("warning: {:#}", e);
    }

    let system = HostSystem::new();
    debug!(
        system = system.system_type(),
        project = %context.project_name,
        project_dir = %context.project_dir.display(),
        "Context loaded"
    );

    let client_config = ClientConfig::default()
        .with_request_timeout(context.probe_timeout)
        .with_connect_timeout(context.probe_timeout);
    let prober = ReadinessProber::new(ServiceClient::new(client_config)?, context.probe_interval);

    let credentials = ChainSource::new()
        .with(EnvSource::from_process_env())
        .with(PromptSource::new());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            trigger.cancel();
        }
    });

    let operator = Operator {
        system: &system,
        context: &context,
        credentials: &credentials,
        prober: &prober,
    };
    let timeout = cli.timeout();
    operator.execute(cli.command, timeout, &cancel).await
}

/// `RUST_LOG` wins, then `LOG_LEVEL` from the env file, then the default.
fn init_tracing(env_file: &Path) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match env_file_log_level(env_file) {
            Some(level) => EnvFilter::try_new(format!(
                "kbstack_provision={level},kbstack_client={level}"
            ))
            .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?,
            None => EnvFilter::try_new(DEFAULT_FILTER)?,
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot initialize logging: {}", e))
}

fn env_file_log_level(path: &Path) -> Option<String> {
    dotenvy::from_path_iter(path)
        .ok()?
        .filter_map(|item| item.ok())
        .find(|(key, _)| key == LOG_LEVEL)
        .map(|(_, value)| value.trim().to_lowercase())
        .filter(|level| !level.is_empty())
}
