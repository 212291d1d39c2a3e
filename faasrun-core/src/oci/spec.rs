// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! OCI runtime spec model and builder.

use std::ffi::OsString;

use serde::{Deserialize, Serialize};

use crate::error::HookResolutionError;
use crate::oci::hook::NetnsHook;
use crate::runtime::{ImageConfig, PulledImage};

/// OCI runtime spec version emitted in `ociVersion`.
pub const OCI_VERSION: &str = "1.0.2";

/// Default `PATH` for processes whose image does not declare one.
const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/asound",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/proc/scsi",
    "/sys/firmware",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

// =============================================================================
// OCI Runtime Spec Types
// =============================================================================

/// OCI runtime spec (`config.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub oci_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<LinuxConfig>,
}

/// OCI process config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// OCI user config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

/// OCI root filesystem config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub path: String,
    #[serde(default)]
    pub readonly: bool,
}

/// OCI mount config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Mount {
    fn new(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: mount_type.to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// OCI lifecycle hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prestart: Option<Vec<Hook>>,
}

/// A single hook invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfig {
    pub namespaces: Vec<LinuxNamespace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readonly_paths: Vec<String>,
}

/// OCI namespace config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builds the runtime spec for a pulled image.
#[derive(Debug, Clone, Default)]
pub struct SpecBuilder {
    hook_search_path: Option<OsString>,
}

impl SpecBuilder {
    /// Builder resolving the `netns` hook on the process `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder resolving the `netns` hook on an explicit search path.
    pub fn with_hook_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            hook_search_path: Some(search_path.into()),
        }
    }

    /// Compose the image's defaults with the netns prestart hook.
    ///
    /// The hook is resolved on every call, so a `netns` binary removed at
    /// runtime fails the next deployment rather than the process.
    pub fn build(&self, image: &PulledImage) -> Result<Spec, HookResolutionError> {
        let mut spec = image_spec(&image.config);

        let hook = NetnsHook::resolve(self.hook_search_path.as_deref())?;
        hook.inject(&mut spec);

        tracing::debug!(image = %image.name, "Built OCI spec");
        Ok(spec)
    }
}

/// Runtime defaults with the image's process configuration applied.
pub(crate) fn image_spec(config: &ImageConfig) -> Spec {
    let mut args: Vec<String> = config
        .entrypoint
        .iter()
        .chain(config.cmd.iter())
        .cloned()
        .collect();
    if args.is_empty() {
        args.push("/bin/sh".to_string());
    }

    let mut env = config.env.clone();
    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.insert(0, DEFAULT_PATH_ENV.to_string());
    }

    let cwd = config
        .working_dir
        .clone()
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| "/".to_string());

    Spec {
        oci_version: OCI_VERSION.to_string(),
        process: Some(Process {
            terminal: false,
            user: parse_user(config.user.as_deref()),
            args,
            env,
            cwd,
            no_new_privileges: true,
        }),
        root: Some(Root {
            path: "rootfs".to_string(),
            readonly: false,
        }),
        hostname: None,
        mounts: default_mounts(),
        hooks: None,
        linux: Some(LinuxConfig {
            namespaces: ["pid", "ipc", "uts", "mount", "network"]
                .into_iter()
                .map(|ns_type| LinuxNamespace {
                    ns_type: ns_type.to_string(),
                    path: None,
                })
                .collect(),
            masked_paths: MASKED_PATHS.iter().map(|p| p.to_string()).collect(),
            readonly_paths: READONLY_PATHS.iter().map(|p| p.to_string()).collect(),
        }),
    }
}

/// Parse an image `User` of the form `uid` or `uid:gid`.
///
/// Names need the container's `/etc/passwd`, which is not mounted yet, so
/// they run as root.
fn parse_user(user: Option<&str>) -> User {
    let Some(user) = user.filter(|u| !u.is_empty()) else {
        return User::default();
    };

    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (user, None),
    };

    match (uid.parse::<u32>(), gid.map(str::parse::<u32>)) {
        (Ok(uid), None) => User { uid, gid: uid },
        (Ok(uid), Some(Ok(gid))) => User { uid, gid },
        _ => {
            tracing::warn!(user = %user, "Non-numeric image user, running as root");
            User::default()
        }
    }
}

fn default_mounts() -> Vec<Mount> {
    vec![
        Mount::new("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"]),
        Mount::new(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        Mount::new(
            "/dev/pts",
            "devpts",
            "devpts",
            &["nosuid", "noexec", "newinstance", "ptmxmode=0666", "mode=0620", "gid=5"],
        ),
        Mount::new(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        Mount::new("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        Mount::new("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
        Mount::new(
            "/sys/fs/cgroup",
            "cgroup",
            "cgroup",
            &["nosuid", "noexec", "nodev", "relatime", "ro"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image(config: ImageConfig) -> PulledImage {
        PulledImage {
            name: "docker.io/library/alpine:3.18".to_string(),
            digest: "sha256:abc".to_string(),
            size: 3_400_000,
            config,
        }
    }

    #[test]
    fn test_args_from_entrypoint_and_cmd() {
        let spec = image_spec(&ImageConfig {
            entrypoint: vec!["/usr/bin/fwatchdog".to_string()],
            cmd: vec!["--port".to_string(), "8080".to_string()],
            ..Default::default()
        });
        let process = spec.process.unwrap();
        assert_eq!(process.args, vec!["/usr/bin/fwatchdog", "--port", "8080"]);
        assert_eq!(process.cwd, "/");
    }

    #[test]
    fn test_defaults_for_empty_image_config() {
        let spec = image_spec(&ImageConfig::default());
        let process = spec.process.as_ref().unwrap();
        assert_eq!(process.args, vec!["/bin/sh"]);
        assert_eq!(process.env, vec![DEFAULT_PATH_ENV.to_string()]);
        assert_eq!(process.user, User { uid: 0, gid: 0 });
        assert_eq!(spec.root.unwrap().path, "rootfs");
        assert!(spec.hooks.is_none());

        let linux = spec.linux.unwrap();
        assert!(linux.namespaces.iter().any(|ns| ns.ns_type == "network"));
        assert!(spec.mounts.iter().any(|m| m.destination == "/proc"));
    }

    #[test]
    fn test_image_path_env_kept() {
        let spec = image_spec(&ImageConfig {
            env: vec!["PATH=/opt/bin".to_string(), "fprocess=cat".to_string()],
            working_dir: Some("/home/app".to_string()),
            ..Default::default()
        });
        let process = spec.process.unwrap();
        assert_eq!(process.env, vec!["PATH=/opt/bin", "fprocess=cat"]);
        assert_eq!(process.cwd, "/home/app");
    }

    #[test]
    fn test_parse_user() {
        assert_eq!(parse_user(None), User { uid: 0, gid: 0 });
        assert_eq!(parse_user(Some("1000")), User { uid: 1000, gid: 1000 });
        assert_eq!(parse_user(Some("1000:2000")), User { uid: 1000, gid: 2000 });
        assert_eq!(parse_user(Some("app")), User { uid: 0, gid: 0 });
        assert_eq!(parse_user(Some("1000:app")), User { uid: 0, gid: 0 });
    }

    #[test]
    fn test_spec_serializes_oci_field_names() {
        let json = serde_json::to_value(image_spec(&ImageConfig::default())).unwrap();
        assert_eq!(json["ociVersion"], OCI_VERSION);
        assert_eq!(json["process"]["noNewPrivileges"], true);
        assert!(json["linux"]["maskedPaths"].is_array());
        assert_eq!(json["mounts"][0]["type"], "proc");
        assert!(json.get("hooks").is_none());
    }

    #[test]
    fn test_build_fails_without_netns() {
        let dir = TempDir::new().unwrap();
        let builder = SpecBuilder::with_hook_search_path(dir.path());
        let result = builder.build(&image(ImageConfig::default()));
        assert!(matches!(result, Err(HookResolutionError::NotFound { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_injects_single_hook() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let netns = dir.path().join("netns");
        std::fs::write(&netns, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&netns, std::fs::Permissions::from_mode(0o755)).unwrap();

        let builder = SpecBuilder::with_hook_search_path(dir.path());
        let spec = builder.build(&image(ImageConfig::default())).unwrap();

        let prestart = spec.hooks.unwrap().prestart.unwrap();
        assert_eq!(prestart.len(), 1);
        assert_eq!(prestart[0].path, netns.to_string_lossy());
        assert_eq!(prestart[0].args, vec!["netns"]);
    }
}
