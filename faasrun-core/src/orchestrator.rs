// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Container lifecycle orchestration for a single deployment.
//!
//! One run drives a deployment through
//! pull → spec → container → task → wait → start → supervise → kill → cleanup.
//! Every resource is released through a [`CleanupStack`] on every exit path,
//! so the task is always deleted before its container.

use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::watch;

use crate::cleanup::CleanupStack;
use crate::error::DeployError;
use crate::oci::SpecBuilder;
use crate::request::Deployment;
use crate::runtime::{ExitStatus, RuntimeClient, SnapshotCleanup, TaskIo};
use crate::state::{DeploymentState, DeploymentStateMachine};
use crate::types::ServiceName;

/// Outcome of one deployment run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub service: ServiceName,
    /// `Cleaned`, or `PullFailed` when nothing was created.
    pub final_state: DeploymentState,
    /// The step that failed, if any.
    pub failure: Option<DeployError>,
    /// Exit status of the task, if it was observed to exit.
    pub exit: Option<ExitStatus>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Drives deployments against a runtime client.
pub struct Orchestrator {
    runtime: Arc<dyn RuntimeClient>,
    specs: SpecBuilder,
    namespace: String,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        specs: SpecBuilder,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            specs,
            namespace: namespace.into(),
        }
    }

    /// Runtime namespace deployments are created in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn runtime(&self) -> &Arc<dyn RuntimeClient> {
        &self.runtime
    }

    /// Run `deployment` to completion.
    ///
    /// State changes are published on `publisher`. Setting `cancel` to
    /// `true` ends the supervision window early. Runtime failures are
    /// reported in the returned [`RunReport`], never raised.
    pub async fn run(
        &self,
        deployment: &Deployment,
        mut cancel: watch::Receiver<bool>,
        publisher: watch::Sender<DeploymentState>,
    ) -> RunReport {
        let service = deployment.service.clone();
        let mut machine = DeploymentStateMachine::with_publisher(service.clone(), publisher);
        let mut cleanups = CleanupStack::new(service.as_str());

        tracing::info!(
            service = %service,
            image = %deployment.image,
            runtime = self.runtime.name(),
            "Deployment started"
        );

        let outcome = self
            .drive(deployment, &mut machine, &mut cleanups, &mut cancel)
            .await;

        let (failure, exit) = match outcome {
            Ok(exit) => (None, exit),
            Err(e) => {
                tracing::error!(
                    service = %service,
                    state = machine.state().name(),
                    error = %e,
                    "Deployment failed"
                );
                if machine.state() != DeploymentState::PullFailed {
                    advance(&mut machine, DeploymentState::Failed);
                }
                (Some(e), None)
            }
        };

        if !machine.state().is_terminal() {
            cleanups.unwind().await;
            advance(&mut machine, DeploymentState::Cleaned);
        }

        tracing::info!(
            service = %service,
            state = machine.state().name(),
            exit_code = ?exit.and_then(|s| s.code),
            transitions = machine.transition_count(),
            "Deployment finished"
        );

        RunReport {
            service,
            final_state: machine.state(),
            failure,
            exit,
        }
    }

    async fn drive(
        &self,
        deployment: &Deployment,
        machine: &mut DeploymentStateMachine,
        cleanups: &mut CleanupStack,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Option<ExitStatus>, DeployError> {
        let service = &deployment.service;

        advance(machine, DeploymentState::Pulling);
        let pulled = tokio::select! {
            pulled = self.runtime.pull_and_unpack(&self.namespace, &deployment.image) => pulled,
            _ = cancelled(cancel) => return Err(DeployError::Cancelled("image pull")),
        };
        let image = match pulled {
            Ok(image) => image,
            Err(e) => {
                advance(machine, DeploymentState::PullFailed);
                return Err(DeployError::Pull(e));
            }
        };
        tracing::info!(
            service = %service,
            image = %image.name,
            digest = %image.digest,
            size = image.size,
            "Image pulled"
        );
        advance(machine, DeploymentState::Pulled);

        ensure_not_cancelled(cancel, "container create")?;
        let spec = self.specs.build(&image)?;
        let snapshot = service.snapshot_name();
        let container = self
            .runtime
            .create_container(&self.namespace, service, &image, &snapshot, &spec)
            .await
            .map_err(DeployError::ContainerCreate)?;
        advance(machine, DeploymentState::ContainerCreated);

        cleanups.defer("container delete", {
            let container = Arc::clone(&container);
            let service = service.clone();
            async move {
                match container.delete(SnapshotCleanup::Remove).await {
                    Ok(()) => tracing::debug!(service = %service, "Container deleted"),
                    Err(e) => {
                        tracing::warn!(service = %service, error = %e, "Container delete failed")
                    }
                }
            }
        });

        let task = container
            .new_task(TaskIo::Stdio)
            .await
            .map_err(DeployError::TaskCreate)?;
        advance(machine, DeploymentState::TaskCreated);

        cleanups.defer("task delete", {
            let task = Arc::clone(&task);
            let service = service.clone();
            async move {
                match task.delete().await {
                    Ok(()) => tracing::debug!(service = %service, "Task deleted"),
                    Err(e) => tracing::warn!(service = %service, error = %e, "Task delete failed"),
                }
            }
        });

        // Exit interest must be registered before start.
        let mut exit = task.wait().await.map_err(DeployError::WaitRegister)?;
        advance(machine, DeploymentState::WaitRegistered);

        ensure_not_cancelled(cancel, "task start")?;
        task.start().await.map_err(DeployError::Start)?;
        advance(machine, DeploymentState::Running);

        let supervision = deployment.supervision;
        tracing::info!(
            service = %service,
            pid = ?task.pid(),
            window_secs = supervision.window.as_secs_f64(),
            "Task started"
        );

        tokio::select! {
            status = exit.exited() => {
                tracing::info!(service = %service, exit_code = ?status.code, "Task exited");
                advance(machine, DeploymentState::Exited);
                return Ok(Some(status));
            }
            _ = tokio::time::sleep(supervision.window) => {
                tracing::info!(service = %service, "Supervision window elapsed");
            }
            _ = cancelled(cancel) => {
                tracing::info!(service = %service, "Deployment cancelled");
            }
        }

        if let Some(status) = exit.try_exited() {
            tracing::info!(service = %service, exit_code = ?status.code, "Task exited");
            advance(machine, DeploymentState::Exited);
            return Ok(Some(status));
        }

        task.kill(supervision.signal)
            .await
            .map_err(DeployError::Kill)?;
        advance(machine, DeploymentState::Killed);
        tracing::info!(service = %service, signal = %supervision.signal, "Task signalled");

        match tokio::time::timeout(supervision.grace, exit.exited()).await {
            Ok(status) => Ok(Some(status)),
            Err(_) => {
                tracing::warn!(
                    service = %service,
                    grace_secs = supervision.grace.as_secs_f64(),
                    "Task ignored termination signal, sending SIGKILL"
                );
                if let Err(e) = task.kill(Signal::SIGKILL).await {
                    tracing::warn!(service = %service, error = %e, "SIGKILL failed");
                }
                Ok(exit.try_exited())
            }
        }
    }
}

fn advance(machine: &mut DeploymentStateMachine, state: DeploymentState) {
    if let Err(e) = machine.transition_to(state) {
        tracing::error!(error = %e, "Deployment state machine rejected transition");
    }
}

fn ensure_not_cancelled(
    cancel: &watch::Receiver<bool>,
    step: &'static str,
) -> Result<(), DeployError> {
    if *cancel.borrow() {
        return Err(DeployError::Cancelled(step));
    }
    Ok(())
}

/// Resolves once `cancel` is set; never if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
