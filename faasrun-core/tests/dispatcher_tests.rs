// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Dispatcher tests: in-flight exclusion, status retention and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{netns_dir, spec_builder, Call, FakeRuntime};
use faasrun_core::error::DispatchError;
use faasrun_core::{
    DeployConfig, DeploymentRequest, DeploymentState, Dispatcher, Orchestrator, ServiceName,
};

fn dispatcher(runtime: &Arc<FakeRuntime>, netns: &TempDir) -> Dispatcher {
    let orchestrator = Orchestrator::new(runtime.clone(), spec_builder(netns), "openfaas-fn");
    let defaults = DeployConfig {
        kill_grace: Duration::from_millis(200),
        ..DeployConfig::default()
    };
    Dispatcher::new(orchestrator, "docker.io", defaults)
}

fn service(name: &str) -> ServiceName {
    ServiceName::new(name).unwrap()
}

async fn wait_until_running(dispatcher: &Dispatcher, name: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.status(&service(name)).unwrap().state != DeploymentState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("deployment never reached Running");
}

#[tokio::test]
async fn test_dispatch_returns_before_run_completes() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    let accepted = dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    assert_eq!(accepted.service.as_str(), "echo");
    assert_eq!(accepted.image.as_str(), "docker.io/library/alpine:3.18");

    let status = dispatcher.status(&service("echo")).unwrap();
    assert!(status.in_flight);
    assert_eq!(dispatcher.in_flight(), 1);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_same_service_rejected_while_in_flight() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    let second = dispatcher.dispatch(DeploymentRequest::new("echo", "alpine:3.19"));
    assert!(matches!(second, Err(DispatchError::InFlight(ref s)) if s.as_str() == "echo"));

    // Other services are independent.
    dispatcher
        .dispatch(DeploymentRequest::new("figlet", "functions/figlet"))
        .unwrap();

    wait_until_running(&dispatcher, "echo").await;
    assert!(dispatcher.cancel(&service("echo")).unwrap());

    let report = dispatcher.wait(&service("echo")).await.unwrap().unwrap();
    assert_eq!(report.final_state, DeploymentState::Cleaned);

    dispatcher.shutdown().await;

    let creates = runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CreateContainer { id, .. } if id == "echo"))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_status_retained_after_pull_failure() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new()
        .with_missing_image("docker.io/library/does-not-exist:latest")
        .shared();
    let dispatcher = dispatcher(&runtime, &netns);

    dispatcher
        .dispatch(DeploymentRequest::new("missing", "does-not-exist:latest"))
        .unwrap();
    let report = dispatcher.wait(&service("missing")).await.unwrap().unwrap();
    assert_eq!(report.final_state, DeploymentState::PullFailed);

    let status = dispatcher.status(&service("missing")).unwrap();
    assert!(!status.in_flight);
    assert_eq!(status.state, DeploymentState::PullFailed);
    assert!(status.failure.unwrap().contains("image pull failed"));
}

#[tokio::test]
async fn test_redeploy_after_completion_accepted() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().exiting_on_start(0).shared();
    let dispatcher = dispatcher(&runtime, &netns);

    dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    dispatcher.wait(&service("echo")).await.unwrap();

    dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    let report = dispatcher.wait(&service("echo")).await.unwrap().unwrap();
    assert!(report.succeeded());

    let status = dispatcher.status(&service("echo")).unwrap();
    assert_eq!(status.exit_code, Some(0));
    assert_eq!(status.state, DeploymentState::Cleaned);
}

#[tokio::test]
async fn test_invalid_request_rejected_synchronously() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    let result = dispatcher.dispatch(DeploymentRequest::new("", "alpine"));
    assert!(matches!(result, Err(DispatchError::Invalid(_))));

    let result = dispatcher.dispatch(DeploymentRequest::new("echo", "Alpine"));
    assert!(matches!(result, Err(DispatchError::Invalid(_))));

    assert!(dispatcher.list().is_empty());
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_service() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    assert!(matches!(
        dispatcher.status(&service("ghost")),
        Err(DispatchError::NotFound(_))
    ));
    assert!(matches!(
        dispatcher.cancel(&service("ghost")),
        Err(DispatchError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_cancels_and_cleans_every_run() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    for name in ["alpha", "beta"] {
        dispatcher
            .dispatch(DeploymentRequest::new(name, "alpine:3.18"))
            .unwrap();
    }
    wait_until_running(&dispatcher, "alpha").await;
    wait_until_running(&dispatcher, "beta").await;

    dispatcher.shutdown().await;

    let statuses = dispatcher.list();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].service.as_str(), "alpha");
    for status in &statuses {
        assert!(!status.in_flight);
        assert_eq!(status.state, DeploymentState::Cleaned);
    }

    let deletes = runtime
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::ContainerDelete(..)))
        .count();
    assert_eq!(deletes, 2);
}

#[tokio::test]
async fn test_shutdown_does_not_hang_on_stalled_pull() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().stalling_pull().shared();
    let dispatcher = dispatcher(&runtime, &netns);

    dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    runtime.wait_for_call(|c| matches!(c, Call::Pull(_))).await;

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown did not finish");

    let status = dispatcher.status(&service("echo")).unwrap();
    assert!(!status.in_flight);
    assert!(status.failure.unwrap().contains("cancelled"));
    assert!(!runtime
        .calls()
        .iter()
        .any(|c| matches!(c, Call::CreateContainer { .. })));
}

#[tokio::test]
async fn test_cancel_of_finished_run_removes_entry() {
    let netns = netns_dir();
    let runtime = FakeRuntime::new().exiting_on_start(0).shared();
    let dispatcher = dispatcher(&runtime, &netns);

    dispatcher
        .dispatch(DeploymentRequest::new("echo", "alpine:3.18"))
        .unwrap();
    dispatcher.wait(&service("echo")).await.unwrap();

    assert!(!dispatcher.cancel(&service("echo")).unwrap());
    assert!(dispatcher.list().is_empty());
    assert!(matches!(
        dispatcher.status(&service("echo")),
        Err(DispatchError::NotFound(_))
    ));
}
