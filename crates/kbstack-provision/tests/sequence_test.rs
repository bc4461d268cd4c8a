// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the provisioning sequence on the mock host.

mod common;

use std::time::Duration;

use common::*;
use kbstack_client::ServiceState;
use kbstack_provision::cli::{Command, Operator};
use kbstack_provision::system::MockSystem;
use kbstack_provision::{
    EXIT_MISSING_CREDENTIAL, EnvSource, ProvisionError, ProvisioningSequence, ReadinessProber,
    ScriptedProbe, SequenceOptions,
};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_bare_host_to_ready_service() {
    let project = TestProject::new();
    let system = MockSystem::new();
    let credentials = valid_credentials();
    let prober = ReadinessProber::new(
        ScriptedProbe::new([refused(), degraded()], ready()),
        project.context.probe_interval,
    );

    let report = ProvisioningSequence::new(&system, &project.context, &credentials, &prober)
        .run(&SequenceOptions::full(), &CancellationToken::new())
        .await
        .unwrap();

    let install = report.install.as_ref().unwrap();
    assert_eq!(install.installed.len(), 6);
    assert!(report.env_file_created);
    assert!(report.firewall.as_ref().unwrap().enabled);
    assert_eq!(report.handle.container_ids, system.containers());
    assert!(report.health.is_ready());
    assert_eq!(prober.probe().calls(), 3);

    let up = system.last_compose_up().unwrap();
    assert_eq!(up.env_value("VECTOR_DB_API_KEY"), Some(TEST_KEY));
    assert_eq!(up.current_dir.as_deref(), Some(project.dir.path()));
}

#[tokio::test(start_paused = true)]
async fn test_second_run_changes_nothing() {
    let project = TestProject::new();
    let system = MockSystem::new();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let cancel = CancellationToken::new();

    let first = ProvisioningSequence::new(&system, &project.context, &valid_credentials(), &prober)
        .run(&SequenceOptions::full(), &cancel)
        .await
        .unwrap();
    let env_file = std::fs::read(&project.context.env_file).unwrap();
    let rules = system.ufw_rules();

    let source = CountingSource::new(EnvSource::default());
    let second = ProvisioningSequence::new(&system, &project.context, &source, &prober)
        .run(&SequenceOptions::full(), &cancel)
        .await
        .unwrap();

    assert!(second.install.as_ref().unwrap().is_noop());
    assert!(!second.env_file_created);
    assert_eq!(source.calls(), 0);
    assert!(second.firewall.as_ref().unwrap().added.is_empty());
    assert_eq!(system.ufw_rules(), rules);
    assert_eq!(std::fs::read(&project.context.env_file).unwrap(), env_file);
    assert_eq!(second.handle.container_ids, first.handle.container_ids);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_stop_before_firewall_and_launch() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);

    let err = ProvisioningSequence::new(&system, &project.context, &EnvSource::default(), &prober)
        .run(&SequenceOptions::full(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::MissingCredential(_)));
    assert_eq!(err.exit_code(), EXIT_MISSING_CREDENTIAL);
    assert!(!project.context.env_file.exists());
    assert!(system.ufw_rules().is_empty());
    assert!(system.last_compose_up().is_none());
    assert_eq!(prober.probe().calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_service_is_not_an_error() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let prober = ReadinessProber::new(ScriptedProbe::always(degraded()), project.context.probe_interval);

    let report = ProvisioningSequence::new(&system, &project.context, &valid_credentials(), &prober)
        .run(
            &SequenceOptions::start_only().with_timeout(Some(Duration::from_secs(10))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.health.status, ServiceState::Degraded);
    assert!(report.install.is_none());
    assert!(report.firewall.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_from_env_file() {
    let project = TestProject::new();
    std::fs::write(
        &project.context.env_file,
        format!("VECTOR_DB_URL={TEST_URL}\nVECTOR_DB_API_KEY={TEST_KEY}\nTIMEOUT_SECONDS=4\n"),
    )
    .unwrap();
    let system = MockSystem::provisioned();
    let prober = ReadinessProber::new(ScriptedProbe::always(refused()), project.context.probe_interval);

    let err = ProvisioningSequence::new(&system, &project.context, &EnvSource::default(), &prober)
        .run(&SequenceOptions::start_only(), &CancellationToken::new())
        .await
        .unwrap_err();

    // 0, 2, 4
    assert!(matches!(err, ProvisionError::ServiceUnreachable { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_largest_timeout_is_accepted() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let prober = ReadinessProber::new(
        ScriptedProbe::new([refused()], ready()),
        project.context.probe_interval,
    );

    let report = ProvisioningSequence::new(&system, &project.context, &valid_credentials(), &prober)
        .run(
            &SequenceOptions::start_only().with_timeout(Some(Duration::from_secs(u64::MAX))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.health.is_ready());
    assert_eq!(prober.probe().calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_launch_leaves_containers_running() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let prober = ReadinessProber::new(ScriptedProbe::always(refused()), project.context.probe_interval);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = ProvisioningSequence::new(&system, &project.context, &valid_credentials(), &prober)
        .run(&SequenceOptions::start_only(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled));
    assert_eq!(system.containers().len(), 1);
}

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let project = TestProject::new();
    let system = MockSystem::new();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ProvisioningSequence::new(&system, &project.context, &valid_credentials(), &prober)
        .run(&SequenceOptions::full(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled));
    assert!(system.calls().is_empty());
    assert!(!project.context.env_file.exists());
}

// ============================================================================
// Operator commands
// ============================================================================

#[tokio::test]
async fn test_status_requires_running_service() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let credentials = valid_credentials();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let operator = Operator {
        system: &system,
        context: &project.context,
        credentials: &credentials,
        prober: &prober,
    };

    let err = operator
        .execute(Command::Status, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::ServiceNotRunning));
    assert_eq!(prober.probe().calls(), 0);
}

#[tokio::test]
async fn test_status_of_unreachable_service_fails() {
    let project = TestProject::new();
    let system = MockSystem::provisioned().with_running_service();
    let credentials = valid_credentials();
    let prober = ReadinessProber::new(ScriptedProbe::always(refused()), project.context.probe_interval);
    let operator = Operator {
        system: &system,
        context: &project.context,
        credentials: &credentials,
        prober: &prober,
    };

    let err = operator
        .execute(Command::Status, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::ServiceUnreachable { attempts: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_start_stop_restart() {
    let project = TestProject::new();
    let system = MockSystem::provisioned();
    let credentials = valid_credentials();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let operator = Operator {
        system: &system,
        context: &project.context,
        credentials: &credentials,
        prober: &prober,
    };
    let cancel = CancellationToken::new();

    operator
        .execute(Command::Start { rebuild: true }, None, &cancel)
        .await
        .unwrap();
    assert!(project.context.env_file.exists());
    assert_eq!(system.containers().len(), 1);

    operator.execute(Command::Restart, None, &cancel).await.unwrap();
    operator.execute(Command::Status, None, &cancel).await.unwrap();
    operator.execute(Command::Stop, None, &cancel).await.unwrap();
    assert!(system.containers().is_empty());

    let err = operator.execute(Command::Restart, None, &cancel).await.unwrap_err();
    assert!(matches!(err, ProvisionError::ServiceNotRunning));
}

#[tokio::test]
async fn test_logs_passes_follow_and_tail() {
    let project = TestProject::new();
    let system = MockSystem::provisioned().with_running_service();
    let credentials = valid_credentials();
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let operator = Operator {
        system: &system,
        context: &project.context,
        credentials: &credentials,
        prober: &prober,
    };

    operator
        .execute(
            Command::Logs {
                follow: true,
                tail: Some(100),
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let lines = system.command_lines("docker-compose");
    assert!(lines.last().unwrap().ends_with("logs --follow --tail 100"));
}

#[tokio::test]
async fn test_config_command_writes_env_file_once() {
    let project = TestProject::new();
    let system = MockSystem::new();
    let credentials = CountingSource::new(valid_credentials());
    let prober = ReadinessProber::new(ScriptedProbe::always(ready()), project.context.probe_interval);
    let operator = Operator {
        system: &system,
        context: &project.context,
        credentials: &credentials,
        prober: &prober,
    };
    let cancel = CancellationToken::new();

    operator.execute(Command::Config, None, &cancel).await.unwrap();
    let asked = credentials.calls();
    assert!(asked > 0);
    operator.execute(Command::Config, None, &cancel).await.unwrap();
    assert_eq!(credentials.calls(), asked);
    assert!(system.calls().is_empty());
}
