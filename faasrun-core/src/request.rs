// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Deployment requests.
//!
//! A [`DeploymentRequest`] is the raw JSON body received from a client. It is
//! validated against the configured defaults into a [`Deployment`] before any
//! runtime work is scheduled.

use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::error::HardValidationError;
use crate::types::{parse_signal, ImageRef, ServiceName};

/// Raw deployment request body.
///
/// Fields this orchestrator does not act on (`envVars`, `labels`,
/// `network`, ...) are accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub image: String,
    /// Supervision window in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Termination signal, by name or number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl DeploymentRequest {
    pub fn new(service: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            image: image.into(),
            timeout: None,
            signal: None,
        }
    }

    /// Validate the request, qualifying the image with `default_registry`.
    pub fn validate(
        &self,
        default_registry: &str,
        defaults: &DeployConfig,
    ) -> Result<Deployment, HardValidationError> {
        if self.service.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "service",
                context: "deployment request".to_string(),
            });
        }
        if self.image.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "image",
                context: "deployment request".to_string(),
            });
        }

        let service = ServiceName::new(self.service.as_str())?;
        let image = ImageRef::qualify(&self.image, default_registry)?;

        let window = match self.timeout {
            None => defaults.supervision_window,
            Some(0) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "timeout",
                    value: "0".to_string(),
                    reason: "Supervision window must be greater than 0".to_string(),
                })
            }
            Some(secs) => {
                let requested = Duration::from_secs(secs);
                if requested > defaults.max_supervision_window {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "timeout",
                        value: secs.to_string(),
                        reason: format!(
                            "Supervision window must not exceed {}s",
                            defaults.max_supervision_window.as_secs()
                        ),
                    });
                }
                requested
            }
        };

        let signal = match self.signal.as_deref() {
            Some(signal) => parse_signal("signal", signal)?,
            None => defaults.termination_signal,
        };

        Ok(Deployment {
            service,
            image,
            supervision: Supervision {
                window,
                signal,
                grace: defaults.kill_grace,
            },
        })
    }
}

/// How a started task is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervision {
    /// How long the task may run before it is signalled.
    pub window: Duration,
    /// Signal sent when the window ends.
    pub signal: Signal,
    /// Time allowed after `signal` before SIGKILL.
    pub grace: Duration,
}

/// A validated deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub service: ServiceName,
    pub image: ImageRef,
    pub supervision: Supervision,
}
