// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Runtime client interface.
//!
//! The orchestrator talks to the container runtime daemon only through these
//! traits:
//!
//! ```text
//! pull_and_unpack → create_container → new_task → wait → start → kill
//!                                                  task.delete → container.delete
//! ```
//!
//! Implementations must be safe for concurrent use by many deployment runs.
//! Image caching and namespace bookkeeping are their own responsibility.

pub mod ctr;

use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::RuntimeResult;
use crate::oci::Spec;
use crate::types::{ImageRef, ServiceName};

pub use ctr::CtrClient;

// =============================================================================
// Images
// =============================================================================

/// Process defaults and layer identities declared by an image.
///
/// Field names follow the OCI image configuration (`config` and `rootfs`
/// sections flattened).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Uncompressed layer digests, bottom layer first.
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

/// An image pulled and unpacked by the runtime.
///
/// Handed out as `Arc<PulledImage>`; the runtime client owns the cached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledImage {
    /// Fully qualified reference the image was pulled as.
    pub name: String,
    /// Content digest of the manifest (or index) the reference resolved to.
    pub digest: String,
    /// Compressed size in bytes (config plus layers).
    pub size: u64,
    pub config: ImageConfig,
}

// =============================================================================
// Tasks
// =============================================================================

/// Standard I/O binding for a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskIo {
    /// Inherit the orchestrator's stdin/stdout/stderr.
    Stdio,
    /// Discard all task I/O.
    Null,
}

/// What to do with a container's snapshot when the container is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCleanup {
    Remove,
    Keep,
}

/// Exit status reported by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitStatus {
    /// Exit code, when the runtime reports one.
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn unknown() -> Self {
        Self { code: None }
    }
}

/// Registered interest in a task's exit.
///
/// Obtained from [`Task::wait`] before the task is started, so an immediately
/// exiting process cannot be missed.
#[derive(Debug)]
pub struct ExitWait {
    receiver: oneshot::Receiver<ExitStatus>,
    status: Option<ExitStatus>,
}

impl ExitWait {
    /// Create an exit wait and the sender the runtime completes it with.
    pub fn channel() -> (oneshot::Sender<ExitStatus>, Self) {
        let (tx, receiver) = oneshot::channel();
        (
            tx,
            Self {
                receiver,
                status: None,
            },
        )
    }

    /// Wait for the task to exit.
    ///
    /// Cancel safe, and may be awaited again after it completed. A dropped
    /// sender is reported as an exit with unknown status.
    pub async fn exited(&mut self) -> ExitStatus {
        if let Some(status) = self.status {
            return status;
        }

        let status = (&mut self.receiver)
            .await
            .unwrap_or_else(|_| ExitStatus::unknown());
        self.status = Some(status);
        status
    }

    /// Exit status if the task is already known to have exited.
    pub fn try_exited(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            self.status = self.receiver.try_recv().ok();
        }
        self.status
    }
}

// =============================================================================
// Runtime Client Traits
// =============================================================================

/// Handle to a container-runtime daemon.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Returns the binding name, for logs.
    fn name(&self) -> &str;

    /// Pull `image` into `namespace` and unpack it for snapshotting.
    async fn pull_and_unpack(
        &self,
        namespace: &str,
        image: &ImageRef,
    ) -> RuntimeResult<Arc<PulledImage>>;

    /// Materialise a container named `id` whose root filesystem is a new
    /// snapshot `snapshot` of `image`, configured by `spec`.
    ///
    /// Fails with `RuntimeError::AlreadyExists` if the id or snapshot is taken.
    async fn create_container(
        &self,
        namespace: &str,
        id: &ServiceName,
        image: &PulledImage,
        snapshot: &str,
        spec: &Spec,
    ) -> RuntimeResult<Arc<dyn Container>>;
}

/// A materialised container.
#[async_trait]
pub trait Container: Send + Sync {
    /// Container identity.
    fn id(&self) -> &str;

    /// Create (but do not start) the container's task.
    async fn new_task(&self, io: TaskIo) -> RuntimeResult<Arc<dyn Task>>;

    /// Delete the container, optionally removing its snapshot.
    async fn delete(&self, snapshot: SnapshotCleanup) -> RuntimeResult<()>;
}

/// The process instance bound to a container.
#[async_trait]
pub trait Task: Send + Sync {
    /// Process id of the task's init process, once known.
    fn pid(&self) -> Option<u32>;

    /// Register interest in the task's exit. Returns immediately.
    async fn wait(&self) -> RuntimeResult<ExitWait>;

    /// Start the task's main process.
    async fn start(&self) -> RuntimeResult<()>;

    /// Deliver `signal` to the task.
    async fn kill(&self, signal: Signal) -> RuntimeResult<()>;

    /// Release the task's runtime resources.
    async fn delete(&self) -> RuntimeResult<()>;
}
