// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! All types validate their invariants at creation time.

use std::fmt;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum service name length. Container ids and snapshot keys derive from it.
const MAX_SERVICE_NAME_LEN: usize = 63;

/// Suffix appended to a service name to form its snapshot key.
const SNAPSHOT_SUFFIX: &str = "-snapshot";

/// Validated service name, used as container identity.
/// Must start alphanumeric and contain only alphanumerics, `-`, `_` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Create a new ServiceName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service",
                value: name,
                reason: "Service name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_SERVICE_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service",
                value: name.clone(),
                reason: format!(
                    "Service name too long: {} chars (max {})",
                    name.len(),
                    MAX_SERVICE_NAME_LEN
                ),
            });
        }

        if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service",
                value: name,
                reason: "Service name must start with an alphanumeric character".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "service",
                value: name,
                reason: "Service name must contain only alphanumeric characters, hyphens, underscores and dots".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Snapshot key owned by this service's container.
    pub fn snapshot_name(&self) -> String {
        format!("{}{}", self.0, SNAPSHOT_SUFFIX)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

/// Fully qualified image reference (`registry/repository[:tag|@digest]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct ImageRef(String);

impl ImageRef {
    /// Qualify `reference` with `default_registry` unless it already names one.
    ///
    /// Follows the Docker convention: the first path component is a registry
    /// host when it contains `.` or `:` or is `localhost`. Single-component
    /// Docker Hub names gain the `library/` prefix and a missing tag becomes
    /// `latest`.
    pub fn qualify(
        reference: impl AsRef<str>,
        default_registry: &str,
    ) -> Result<Self, HardValidationError> {
        let reference = reference.as_ref().trim();

        if reference.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "image",
                value: String::new(),
                reason: "Image reference cannot be empty".to_string(),
            });
        }

        if reference.chars().any(char::is_whitespace) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "image",
                value: reference.to_string(),
                reason: "Image reference must not contain whitespace".to_string(),
            });
        }

        let (first, rest) = match reference.split_once('/') {
            Some((first, rest)) => (first, Some(rest)),
            None => (reference, None),
        };
        let has_registry = rest.is_some()
            && (first.contains('.') || first.contains(':') || first == "localhost");

        let (registry, remainder) = if has_registry {
            (first, rest.unwrap_or_default())
        } else {
            (default_registry, reference)
        };

        // A digest is anything after '@'; a tag is a ':' after the last '/'.
        let (named, digest) = match remainder.split_once('@') {
            Some((named, digest)) => (named, Some(digest)),
            None => (remainder, None),
        };
        let (name, tag) = match named.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, Some(tag)),
            _ => (named, None),
        };

        if name.is_empty() || name.ends_with('/') || tag == Some("") {
            return Err(HardValidationError::InvalidFieldValue {
                field: "image",
                value: reference.to_string(),
                reason: "Image reference has no repository".to_string(),
            });
        }
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "image",
                value: reference.to_string(),
                reason: "Image repository must be lowercase".to_string(),
            });
        }

        let mut qualified = if registry == "docker.io" && !name.contains('/') {
            format!("{}/library/{}", registry, name)
        } else {
            format!("{}/{}", registry, name)
        };
        match (tag, digest) {
            (Some(tag), _) => {
                qualified.push(':');
                qualified.push_str(tag);
            }
            (None, None) => qualified.push_str(":latest"),
            (None, Some(_)) => {}
        }
        if let Some(digest) = digest {
            qualified.push('@');
            qualified.push_str(digest);
        }

        Ok(Self(qualified))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ImageRef> for String {
    fn from(image: ImageRef) -> Self {
        image.0
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Parse a signal given as `SIGTERM`, `term` or `15`.
pub fn parse_signal(field: &'static str, value: &str) -> Result<Signal, HardValidationError> {
    let trimmed = value.trim();
    let parsed = match trimmed.parse::<i32>() {
        Ok(number) => Signal::try_from(number).ok(),
        Err(_) => {
            let upper = trimmed.to_ascii_uppercase();
            let name = if upper.starts_with("SIG") {
                upper
            } else {
                format!("SIG{}", upper)
            };
            name.parse::<Signal>().ok()
        }
    };

    parsed.ok_or_else(|| HardValidationError::InvalidFieldValue {
        field,
        value: value.to_string(),
        reason: "Not a known signal name or number".to_string(),
    })
}
