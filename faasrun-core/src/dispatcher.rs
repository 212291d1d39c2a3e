// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fire-and-forget deployment dispatcher.
//!
//! Accepts deployment requests, allows at most one in-flight run per service
//! and spawns each run as a detached tokio task. Per-service status is kept
//! in a DashMap after the run completes so later reads observe the outcome.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DeployConfig;
use crate::error::DispatchError;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::request::DeploymentRequest;
use crate::state::DeploymentState;
use crate::types::{ImageRef, ServiceName};

/// How long `shutdown` waits for a cancelled run before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Receipt for an accepted deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub service: ServiceName,
    pub image: ImageRef,
}

/// Point-in-time view of a service's latest deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub service: ServiceName,
    pub image: ImageRef,
    pub state: DeploymentState,
    pub in_flight: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Entry in the deployment registry.
#[derive(Debug)]
struct DeploymentEntry {
    image: ImageRef,
    state: watch::Receiver<DeploymentState>,
    outcome: watch::Receiver<Option<RunReport>>,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl DeploymentEntry {
    /// A run is in flight until it reports, or until its task is gone.
    fn in_flight(&self) -> bool {
        self.outcome.borrow().is_none()
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn status(&self, service: &ServiceName) -> DeploymentStatus {
        let in_flight = self.in_flight();
        let state = *self.state.borrow();
        let outcome = self.outcome.borrow();
        DeploymentStatus {
            service: service.clone(),
            image: self.image.clone(),
            state,
            in_flight,
            failure: outcome
                .as_ref()
                .and_then(|report| report.failure.as_ref())
                .map(|e| e.to_string()),
            exit_code: outcome
                .as_ref()
                .and_then(|report| report.exit)
                .and_then(|exit| exit.code),
        }
    }
}

/// Dispatches deployment runs, one in flight per service.
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    default_registry: String,
    defaults: DeployConfig,
    deployments: DashMap<ServiceName, DeploymentEntry>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Orchestrator,
        default_registry: impl Into<String>,
        defaults: DeployConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            default_registry: default_registry.into(),
            defaults,
            deployments: DashMap::new(),
        }
    }

    /// Validate `request` and start a detached run for it.
    ///
    /// Returns as soon as the run is spawned. Fails with
    /// `DispatchError::InFlight` while a previous run for the same service
    /// has not finished.
    pub fn dispatch(&self, request: DeploymentRequest) -> Result<Accepted, DispatchError> {
        let deployment = request.validate(&self.default_registry, &self.defaults)?;
        let service = deployment.service.clone();

        let entry = self.deployments.entry(service.clone());
        if let Entry::Occupied(existing) = &entry {
            if existing.get().in_flight() {
                tracing::warn!(service = %service, "Deployment rejected, previous run in flight");
                return Err(DispatchError::InFlight(service));
            }
        }

        let (state_tx, state_rx) = watch::channel(DeploymentState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let accepted = Accepted {
            service: service.clone(),
            image: deployment.image.clone(),
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move {
            let report = orchestrator.run(&deployment, cancel_rx, state_tx).await;
            outcome_tx.send_replace(Some(report));
        });

        let fresh = DeploymentEntry {
            image: accepted.image.clone(),
            state: state_rx,
            outcome: outcome_rx,
            cancel: cancel_tx,
            handle: Some(handle),
        };
        match entry {
            Entry::Occupied(mut existing) => {
                existing.insert(fresh);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }

        tracing::info!(service = %accepted.service, image = %accepted.image, "Deployment accepted");
        Ok(accepted)
    }

    /// Status of the latest deployment of `service`.
    pub fn status(&self, service: &ServiceName) -> Result<DeploymentStatus, DispatchError> {
        self.deployments
            .get(service)
            .map(|entry| entry.status(service))
            .ok_or_else(|| DispatchError::NotFound(service.clone()))
    }

    /// Status of every known service, ordered by name.
    pub fn list(&self) -> Vec<DeploymentStatus> {
        let mut statuses: Vec<DeploymentStatus> = self
            .deployments
            .iter()
            .map(|entry| entry.status(entry.key()))
            .collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }

    /// Number of runs currently in flight.
    pub fn in_flight(&self) -> usize {
        self.deployments.iter().filter(|e| e.in_flight()).count()
    }

    /// Cancel the in-flight run for `service`, or forget a finished one.
    ///
    /// A cancelled run still signals its task and cleans up, and stays
    /// visible until it finishes. Returns false if no run was in flight, in
    /// which case the service's entry is removed.
    pub fn cancel(&self, service: &ServiceName) -> Result<bool, DispatchError> {
        let entry = self
            .deployments
            .get(service)
            .ok_or_else(|| DispatchError::NotFound(service.clone()))?;

        if entry.in_flight() {
            entry.cancel.send_replace(true);
            tracing::info!(service = %service, "Deployment cancellation requested");
            return Ok(true);
        }
        drop(entry);

        if self
            .deployments
            .remove_if(service, |_, entry| !entry.in_flight())
            .is_some()
        {
            tracing::info!(service = %service, "Deployment removed");
        }
        Ok(false)
    }

    /// Wait for the latest run of `service` to finish.
    ///
    /// Returns `None` if the run ended without reporting (aborted or
    /// panicked).
    pub async fn wait(&self, service: &ServiceName) -> Result<Option<RunReport>, DispatchError> {
        let mut outcome = self
            .deployments
            .get(service)
            .map(|entry| entry.outcome.clone())
            .ok_or_else(|| DispatchError::NotFound(service.clone()))?;

        let report = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| report.clone());
        Ok(report)
    }

    /// Cancel every in-flight run and wait for their cleanup.
    pub async fn shutdown(&self) {
        let handles: Vec<(ServiceName, JoinHandle<()>)> = self
            .deployments
            .iter_mut()
            .filter(|entry| entry.in_flight())
            .filter_map(|mut entry| {
                entry.cancel.send_replace(true);
                let service = entry.key().clone();
                entry.handle.take().map(|handle| (service, handle))
            })
            .collect();

        tracing::info!(runs = handles.len(), "Cancelling in-flight deployments");

        for (service, mut handle) in handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(service = %service, error = %e, "Deployment run did not finish cleanly");
                }
                Err(_) => {
                    // Dropping the run releases its resources in the background.
                    tracing::warn!(service = %service, "Deployment run ignored cancellation, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }
}
