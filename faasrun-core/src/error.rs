// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for faasrun.
//!
//! Every failure is an explicit enum variant. No `Box<dyn Error>`, no
//! `anyhow::Result` in the library.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ServiceName;

/// Top-level error type for the faasrun core.
#[derive(Debug, Error)]
pub enum FaasError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Validation errors for configuration files and deployment requests.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },
}

/// State transition errors for the deployment state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for service {service}")]
    InvalidTransition {
        service: ServiceName,
        from: &'static str,
        to: &'static str,
    },
}

/// The `netns` prestart hook binary could not be located.
#[derive(Debug, Clone, Error)]
pub enum HookResolutionError {
    #[error("Hook executable '{binary}' not found on search path '{search_path}'")]
    NotFound {
        binary: &'static str,
        search_path: String,
    },
}

/// Errors reported by a runtime client binding.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Runtime daemon unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected output from '{command}': {reason}")]
    MalformedOutput { command: String, reason: String },

    #[error("IO error while {context}: {reason}")]
    Io {
        context: &'static str,
        reason: String,
    },
}

impl RuntimeError {
    /// Returns true if the runtime rejected a duplicate identity.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Failure of a single deployment run, tagged with the phase that failed.
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    #[error("image pull failed: {0}")]
    Pull(#[source] RuntimeError),

    #[error("spec build failed: {0}")]
    SpecBuild(#[from] HookResolutionError),

    #[error("container create failed: {0}")]
    ContainerCreate(#[source] RuntimeError),

    #[error("task create failed: {0}")]
    TaskCreate(#[source] RuntimeError),

    #[error("exit wait registration failed: {0}")]
    WaitRegister(#[source] RuntimeError),

    #[error("task start failed: {0}")]
    Start(#[source] RuntimeError),

    #[error("task kill failed: {0}")]
    Kill(#[source] RuntimeError),

    #[error("deployment cancelled before {0}")]
    Cancelled(&'static str),
}

/// Errors returned synchronously by the deployment dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid deployment request: {0}")]
    Invalid(#[from] HardValidationError),

    #[error("Deployment already in flight for service {0}")]
    InFlight(ServiceName),

    #[error("No deployment for service {0}")]
    NotFound(ServiceName),
}

/// Result type alias using FaasError.
pub type FaasResult<T> = Result<T, FaasError>;

/// Result type alias for runtime client calls.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "service",
            context: "deployment request".to_string(),
        };
        assert!(err.to_string().contains("service"));
        assert!(err.to_string().contains("deployment request"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::InvalidPort {
            port: 0,
            reason: "Port must be non-zero".to_string(),
        };
        let faas_err: FaasError = validation_err.into();
        assert!(matches!(faas_err, FaasError::HardValidation(_)));
    }

    #[test]
    fn test_conflict_detection() {
        let err = RuntimeError::AlreadyExists {
            kind: "container",
            id: "echo".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!RuntimeError::NotFound {
            kind: "image",
            id: "x".to_string()
        }
        .is_conflict());
    }

    #[test]
    fn test_deploy_error_names_phase() {
        let err = DeployError::Pull(RuntimeError::NotFound {
            kind: "image",
            id: "docker.io/library/does-not-exist:latest".to_string(),
        });
        assert!(err.to_string().starts_with("image pull failed"));
        assert!(err.to_string().contains("does-not-exist"));
    }
}
