// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Deployment state machine with typed state transitions.
//!
//! Implements the container lifecycle of one deployment run:
//! Idle → Pulling → Pulled → ContainerCreated → TaskCreated → WaitRegistered
//! → Running → Exited | Killed → Cleaned. Invalid transitions result in
//! StateTransitionError.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::StateTransitionError;
use crate::types::ServiceName;

/// Lifecycle states of a single deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    /// Request accepted, nothing requested from the runtime yet.
    Idle,

    /// Image pull in progress.
    Pulling,

    /// Image pulled and unpacked.
    Pulled,

    /// Image pull failed. Terminal, nothing to clean up.
    PullFailed,

    /// Container and snapshot exist.
    ContainerCreated,

    /// Task exists but has not been started.
    TaskCreated,

    /// Exit notification registered, task still not started.
    WaitRegistered,

    /// Task started and under supervision.
    Running,

    /// Task exited on its own.
    Exited,

    /// Task was sent a termination signal.
    Killed,

    /// A lifecycle step failed after the pull.
    Failed,

    /// All registered cleanups ran. Terminal.
    Cleaned,
}

impl DeploymentState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Pulling => "Pulling",
            Self::Pulled => "Pulled",
            Self::PullFailed => "PullFailed",
            Self::ContainerCreated => "ContainerCreated",
            Self::TaskCreated => "TaskCreated",
            Self::WaitRegistered => "WaitRegistered",
            Self::Running => "Running",
            Self::Exited => "Exited",
            Self::Killed => "Killed",
            Self::Failed => "Failed",
            Self::Cleaned => "Cleaned",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: DeploymentState) -> bool {
        matches!(
            (self, target),
            (Self::Idle, Self::Pulling) |
            // Pull outcome
            (Self::Pulling, Self::Pulled) |
            (Self::Pulling, Self::PullFailed) |
            (Self::Pulling, Self::Failed) |
            // Container materialisation
            (Self::Pulled, Self::ContainerCreated) |
            (Self::Pulled, Self::Failed) |
            // Task setup
            (Self::ContainerCreated, Self::TaskCreated) |
            (Self::ContainerCreated, Self::Failed) |
            (Self::TaskCreated, Self::WaitRegistered) |
            (Self::TaskCreated, Self::Failed) |
            (Self::WaitRegistered, Self::Running) |
            (Self::WaitRegistered, Self::Failed) |
            // Supervision outcome
            (Self::Running, Self::Exited) |
            (Self::Running, Self::Killed) |
            (Self::Running, Self::Failed) |
            // Cleanup
            (Self::Exited, Self::Cleaned) |
            (Self::Killed, Self::Cleaned) |
            (Self::Failed, Self::Cleaned)
        )
    }

    /// True once a run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PullFailed | Self::Cleaned)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one deployment run.
/// Enforces valid transitions and publishes every change to watchers.
#[derive(Debug)]
pub struct DeploymentStateMachine {
    service: ServiceName,
    current_state: DeploymentState,
    last_transition: Instant,
    transition_count: u64,
    publisher: watch::Sender<DeploymentState>,
}

impl DeploymentStateMachine {
    /// Create a new state machine in `Idle`.
    pub fn new(service: ServiceName) -> Self {
        let (publisher, _) = watch::channel(DeploymentState::Idle);
        Self::with_publisher(service, publisher)
    }

    /// Create a state machine that reports transitions on `publisher`.
    pub fn with_publisher(service: ServiceName, publisher: watch::Sender<DeploymentState>) -> Self {
        publisher.send_replace(DeploymentState::Idle);
        Self {
            service,
            current_state: DeploymentState::Idle,
            last_transition: Instant::now(),
            transition_count: 0,
            publisher,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> DeploymentState {
        self.current_state
    }

    /// Get the service this run deploys.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<DeploymentState> {
        self.publisher.subscribe()
    }

    /// Get time since last transition.
    pub fn time_in_current_state(&self) -> std::time::Duration {
        self.last_transition.elapsed()
    }

    /// Get total number of transitions.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: DeploymentState) -> Result<(), StateTransitionError> {
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                service: self.service.clone(),
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            service = %self.service,
            from = self.current_state.name(),
            to = target.name(),
            "State transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;
        self.publisher.send_replace(target);

        Ok(())
    }
}
