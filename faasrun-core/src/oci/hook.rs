// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Network-namespace prestart hook.
//!
//! Every container gets one prestart hook that runs the `netns` executable,
//! which moves the container's network interface into a private namespace
//! before the task's main process starts.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::HookResolutionError;
use crate::oci::spec::{Hook, Hooks, Spec};

/// Name of the hook executable looked up on the search path.
pub const NETNS_BINARY: &str = "netns";

/// A resolved `netns` hook ready to be attached to specifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetnsHook {
    path: PathBuf,
}

impl NetnsHook {
    /// Resolve `netns` on `search_path`, or on `PATH` when `None`.
    pub fn resolve(search_path: Option<&OsStr>) -> Result<Self, HookResolutionError> {
        let search_path: OsString = match search_path {
            Some(path) => path.to_os_string(),
            None => std::env::var_os("PATH").unwrap_or_default(),
        };

        std::env::split_paths(&search_path)
            .map(|dir| dir.join(NETNS_BINARY))
            .find(|candidate| is_executable(candidate))
            .map(|path| Self { path })
            .ok_or_else(|| HookResolutionError::NotFound {
                binary: NETNS_BINARY,
                search_path: search_path.to_string_lossy().into_owned(),
            })
    }

    /// Absolute path of the resolved executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one prestart hook entry to `spec`.
    ///
    /// Not idempotent: call exactly once per specification.
    pub fn inject(&self, spec: &mut Spec) {
        let env = std::env::vars_os()
            .map(|(key, value)| format!("{}={}", key.to_string_lossy(), value.to_string_lossy()))
            .collect();

        let hook = Hook {
            path: self.path.to_string_lossy().into_owned(),
            args: vec![NETNS_BINARY.to_string()],
            env,
            timeout: None,
        };

        spec.hooks
            .get_or_insert_with(Hooks::default)
            .prestart
            .get_or_insert_with(Vec::new)
            .push(hook);

        tracing::debug!(hook = %self.path.display(), "Injected netns prestart hook");
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };

    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
