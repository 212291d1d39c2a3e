// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Faasrun Core Library
//!
//! Function container lifecycle manager. Pulls an image, materialises a
//! container with a network-namespace prestart hook, runs its task for a
//! supervised window, then terminates it and releases every resource.
//! Provides the runtime client interface, OCI spec construction, the
//! per-deployment state machine and the deployment dispatcher.

pub mod cleanup;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod oci;
pub mod orchestrator;
pub mod request;
pub mod runtime;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use cleanup::CleanupStack;
pub use config::{Config, ConfigLoader, DeployConfig, RuntimeConfig, ServerConfig};
pub use dispatcher::{Accepted, DeploymentStatus, Dispatcher};
pub use error::{
    DeployError, DispatchError, FaasError, FaasResult, HardValidationError, HookResolutionError,
    RuntimeError, RuntimeResult,
};
pub use oci::{NetnsHook, Spec, SpecBuilder};
pub use orchestrator::{Orchestrator, RunReport};
pub use request::{Deployment, DeploymentRequest, Supervision};
pub use runtime::{Container, CtrClient, ExitStatus, ExitWait, RuntimeClient, Task};
pub use state::{DeploymentState, DeploymentStateMachine};
pub use types::{ImageRef, Port, ServiceName};
