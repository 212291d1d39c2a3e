// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every field is optional and defaulted. Any invalid value results in a
//! HardValidationError that prevents startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::error::{FaasError, FaasResult, HardValidationError};
use crate::types::{parse_signal, Port};

/// Raw HTTP server configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_http_timeout_secs")]
    read_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    write_timeout_secs: u64,
}

fn default_port() -> u16 {
    8082
}

fn default_http_timeout_secs() -> u64 {
    8
}

impl Default for RawServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            read_timeout_secs: default_http_timeout_secs(),
            write_timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// Raw runtime configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuntimeConfig {
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default = "default_registry")]
    default_registry: String,
    #[serde(default = "default_state_dir")]
    state_dir: String,
    #[serde(default = "default_ctr_binary")]
    ctr_binary: String,
    #[serde(default = "default_runc_binary")]
    runc_binary: String,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
}

fn default_namespace() -> String {
    "openfaas-fn".to_string()
}

fn default_registry() -> String {
    "docker.io".to_string()
}

fn default_state_dir() -> String {
    "/var/lib/faasrun".to_string()
}

fn default_ctr_binary() -> String {
    "ctr".to_string()
}

fn default_runc_binary() -> String {
    "runc".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for RawRuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_registry: default_registry(),
            state_dir: default_state_dir(),
            ctr_binary: default_ctr_binary(),
            runc_binary: default_runc_binary(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Raw deployment defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeployConfig {
    #[serde(default = "default_supervision_window_secs")]
    supervision_window_secs: u64,
    #[serde(default = "default_max_supervision_window_secs")]
    max_supervision_window_secs: u64,
    #[serde(default = "default_termination_signal")]
    termination_signal: String,
    #[serde(default = "default_kill_grace_secs")]
    kill_grace_secs: u64,
}

fn default_supervision_window_secs() -> u64 {
    180
}

fn default_max_supervision_window_secs() -> u64 {
    3600
}

fn default_termination_signal() -> String {
    "SIGTERM".to_string()
}

fn default_kill_grace_secs() -> u64 {
    10
}

impl Default for RawDeployConfig {
    fn default() -> Self {
        Self {
            supervision_window_secs: default_supervision_window_secs(),
            max_supervision_window_secs: default_max_supervision_window_secs(),
            termination_signal: default_termination_signal(),
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    server: RawServerConfig,
    #[serde(default)]
    runtime: RawRuntimeConfig,
    #[serde(default)]
    deploy: RawDeployConfig,
}

/// Validated HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: Port,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Runtime namespace all deployments live in.
    pub namespace: String,
    /// Registry prepended to image references that name none.
    pub default_registry: String,
    /// Root for bundle directories and runc state.
    pub state_dir: PathBuf,
    pub ctr_binary: PathBuf,
    pub runc_binary: PathBuf,
    /// Interval between task state polls.
    pub poll_interval: Duration,
}

/// Validated deployment defaults.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// How long a started task runs when the request names no timeout.
    pub supervision_window: Duration,
    /// Upper bound on a requested supervision window.
    pub max_supervision_window: Duration,
    /// Signal sent when the supervision window ends.
    pub termination_signal: Signal,
    /// Time between the termination signal and SIGKILL.
    pub kill_grace: Duration,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub deploy: DeployConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let raw = RawRuntimeConfig::default();
        Self {
            namespace: raw.namespace,
            default_registry: raw.default_registry,
            state_dir: PathBuf::from(raw.state_dir),
            ctr_binary: PathBuf::from(raw.ctr_binary),
            runc_binary: PathBuf::from(raw.runc_binary),
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            supervision_window: Duration::from_secs(default_supervision_window_secs()),
            max_supervision_window: Duration::from_secs(default_max_supervision_window_secs()),
            termination_signal: Signal::SIGTERM,
            kill_grace: Duration::from_secs(default_kill_grace_secs()),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> FaasResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FaasError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FaasError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn load_string(content: &str) -> FaasResult<Config> {
        if content.trim().is_empty() {
            return Self::validate(RawConfig::default());
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| FaasError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> FaasResult<Config> {
        Ok(Config {
            server: Self::validate_server(raw.server)?,
            runtime: Self::validate_runtime(raw.runtime)?,
            deploy: Self::validate_deploy(raw.deploy)?,
        })
    }

    fn validate_server(raw: RawServerConfig) -> FaasResult<ServerConfig> {
        let port = Port::new(raw.port)?;

        for (field, value) in [
            ("read_timeout_secs", raw.read_timeout_secs),
            ("write_timeout_secs", raw.write_timeout_secs),
        ] {
            if value == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Timeout must be greater than 0".to_string(),
                }
                .into());
            }
        }

        Ok(ServerConfig {
            port,
            read_timeout: Duration::from_secs(raw.read_timeout_secs),
            write_timeout: Duration::from_secs(raw.write_timeout_secs),
        })
    }

    fn validate_runtime(raw: RawRuntimeConfig) -> FaasResult<RuntimeConfig> {
        let context = "runtime";

        for (field, value) in [
            ("namespace", &raw.namespace),
            ("default_registry", &raw.default_registry),
            ("state_dir", &raw.state_dir),
            ("ctr_binary", &raw.ctr_binary),
            ("runc_binary", &raw.runc_binary),
        ] {
            if value.trim().is_empty() {
                return Err(HardValidationError::MissingRequiredField {
                    field,
                    context: context.to_string(),
                }
                .into());
            }
        }

        // containerd namespaces follow DNS label rules.
        let valid_namespace = raw
            .namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
            && raw.namespace.starts_with(|c: char| c.is_ascii_alphanumeric());
        if !valid_namespace {
            return Err(HardValidationError::InvalidFieldValue {
                field: "namespace",
                value: raw.namespace,
                reason: "Namespace must be lowercase alphanumerics, '-' or '.'".to_string(),
            }
            .into());
        }

        if raw.default_registry.contains('/') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "default_registry",
                value: raw.default_registry,
                reason: "Registry must be a host name without a path".to_string(),
            }
            .into());
        }

        let state_dir = PathBuf::from(&raw.state_dir);
        if !state_dir.is_absolute() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "state_dir",
                value: raw.state_dir,
                reason: "State directory must be an absolute path".to_string(),
            }
            .into());
        }

        if raw.poll_interval_ms == 0 || raw.poll_interval_ms > 10_000 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "poll_interval_ms",
                value: raw.poll_interval_ms.to_string(),
                reason: "Must be between 1 and 10000".to_string(),
            }
            .into());
        }

        Ok(RuntimeConfig {
            namespace: raw.namespace,
            default_registry: raw.default_registry,
            state_dir,
            ctr_binary: PathBuf::from(raw.ctr_binary),
            runc_binary: PathBuf::from(raw.runc_binary),
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
        })
    }

    fn validate_deploy(raw: RawDeployConfig) -> FaasResult<DeployConfig> {
        if raw.max_supervision_window_secs == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_supervision_window_secs",
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            }
            .into());
        }

        if raw.supervision_window_secs == 0
            || raw.supervision_window_secs > raw.max_supervision_window_secs
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "supervision_window_secs",
                value: raw.supervision_window_secs.to_string(),
                reason: format!(
                    "Must be between 1 and max_supervision_window_secs ({})",
                    raw.max_supervision_window_secs
                ),
            }
            .into());
        }

        let termination_signal = parse_signal("termination_signal", &raw.termination_signal)?;

        Ok(DeployConfig {
            supervision_window: Duration::from_secs(raw.supervision_window_secs),
            max_supervision_window: Duration::from_secs(raw.max_supervision_window_secs),
            termination_signal,
            kill_grace: Duration::from_secs(raw.kill_grace_secs),
        })
    }
}
