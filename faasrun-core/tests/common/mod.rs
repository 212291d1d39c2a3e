// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test helpers for faasrun-core integration tests.
//!
//! `FakeRuntime` records every runtime call in order and can be told to fail
//! at specific steps.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use tempfile::TempDir;
use tokio::sync::oneshot;

use faasrun_core::error::{RuntimeError, RuntimeResult};
use faasrun_core::oci::Spec;
use faasrun_core::runtime::{
    Container, ExitStatus, ExitWait, ImageConfig, PulledImage, RuntimeClient, SnapshotCleanup,
    Task, TaskIo,
};
use faasrun_core::types::{ImageRef, ServiceName};
use faasrun_core::{DeployConfig, Deployment, DeploymentRequest, SpecBuilder};

/// A runtime call, as observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Pull(String),
    CreateContainer {
        id: String,
        snapshot: String,
        prestart_hooks: usize,
    },
    NewTask(String),
    Wait(String),
    Start(String),
    Kill(String, Signal),
    TaskDelete(String),
    ContainerDelete(String, SnapshotCleanup),
}

#[derive(Debug, Clone, Default)]
struct Behaviour {
    missing_images: HashSet<String>,
    fail_task_create: bool,
    fail_start: bool,
    exit_on_start: Option<i32>,
    ignored_signal: Option<Signal>,
    stall_pull: bool,
    fail_kill: bool,
    fail_deletes: bool,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

/// Recording in-memory runtime.
#[derive(Default)]
pub struct FakeRuntime {
    calls: CallLog,
    containers: Arc<Mutex<HashSet<String>>>,
    behaviour: Behaviour,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls of `reference` (fully qualified) fail with not-found.
    pub fn with_missing_image(mut self, reference: &str) -> Self {
        self.behaviour.missing_images.insert(reference.to_string());
        self
    }

    /// A container named `id` already exists.
    pub fn with_existing_container(self, id: &str) -> Self {
        self.containers.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn failing_task_create(mut self) -> Self {
        self.behaviour.fail_task_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.behaviour.fail_start = true;
        self
    }

    /// Tasks exit with `code` as soon as they are started.
    pub fn exiting_on_start(mut self, code: i32) -> Self {
        self.behaviour.exit_on_start = Some(code);
        self
    }

    /// Tasks survive `signal` and only exit on another one.
    pub fn ignoring(mut self, signal: Signal) -> Self {
        self.behaviour.ignored_signal = Some(signal);
        self
    }

    /// Pulls never complete.
    pub fn stalling_pull(mut self) -> Self {
        self.behaviour.stall_pull = true;
        self
    }

    /// Every kill fails and leaves the task running.
    pub fn failing_kill(mut self) -> Self {
        self.behaviour.fail_kill = true;
        self
    }

    /// Task and container deletes are recorded, then fail.
    pub fn failing_deletes(mut self) -> Self {
        self.behaviour.fail_deletes = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Snapshot of the calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Poll until a call matching `predicate` is recorded.
    pub async fn wait_for_call(&self, predicate: impl Fn(&Call) -> bool) -> Vec<Call> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = self.calls();
                if calls.iter().any(&predicate) {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected runtime call was never made")
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn pull_and_unpack(
        &self,
        _namespace: &str,
        image: &ImageRef,
    ) -> RuntimeResult<Arc<PulledImage>> {
        self.record(Call::Pull(image.as_str().to_string()));

        if self.behaviour.stall_pull {
            std::future::pending::<()>().await;
        }

        if self.behaviour.missing_images.contains(image.as_str()) {
            return Err(RuntimeError::NotFound {
                kind: "image",
                id: image.as_str().to_string(),
            });
        }

        Ok(Arc::new(PulledImage {
            name: image.as_str().to_string(),
            digest: "sha256:0123456789abcdef".to_string(),
            size: 3_400_000,
            config: ImageConfig {
                cmd: vec!["/bin/sh".to_string()],
                diff_ids: vec!["sha256:aaaa".to_string()],
                ..Default::default()
            },
        }))
    }

    async fn create_container(
        &self,
        _namespace: &str,
        id: &ServiceName,
        _image: &PulledImage,
        snapshot: &str,
        spec: &Spec,
    ) -> RuntimeResult<Arc<dyn Container>> {
        self.record(Call::CreateContainer {
            id: id.as_str().to_string(),
            snapshot: snapshot.to_string(),
            prestart_hooks: spec
                .hooks
                .as_ref()
                .and_then(|h| h.prestart.as_ref())
                .map_or(0, Vec::len),
        });

        if !self.containers.lock().unwrap().insert(id.as_str().to_string()) {
            return Err(RuntimeError::AlreadyExists {
                kind: "container",
                id: id.as_str().to_string(),
            });
        }

        Ok(Arc::new(FakeContainer {
            id: id.as_str().to_string(),
            calls: Arc::clone(&self.calls),
            containers: Arc::clone(&self.containers),
            behaviour: self.behaviour.clone(),
        }))
    }
}

struct FakeContainer {
    id: String,
    calls: CallLog,
    containers: Arc<Mutex<HashSet<String>>>,
    behaviour: Behaviour,
}

#[async_trait]
impl Container for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_task(&self, _io: TaskIo) -> RuntimeResult<Arc<dyn Task>> {
        self.calls.lock().unwrap().push(Call::NewTask(self.id.clone()));

        if self.behaviour.fail_task_create {
            return Err(RuntimeError::CommandFailed {
                command: "runc create".to_string(),
                status: "exit status: 1".to_string(),
                stderr: String::new(),
            });
        }

        Ok(Arc::new(FakeTask {
            id: self.id.clone(),
            calls: Arc::clone(&self.calls),
            behaviour: self.behaviour.clone(),
            exit: Mutex::new(None),
        }))
    }

    async fn delete(&self, snapshot: SnapshotCleanup) -> RuntimeResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::ContainerDelete(self.id.clone(), snapshot));

        if self.behaviour.fail_deletes {
            return Err(delete_failure("ctr containers delete"));
        }
        self.containers.lock().unwrap().remove(&self.id);
        Ok(())
    }
}

struct FakeTask {
    id: String,
    calls: CallLog,
    behaviour: Behaviour,
    exit: Mutex<Option<oneshot::Sender<ExitStatus>>>,
}

impl FakeTask {
    fn exit_with(&self, code: i32) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(ExitStatus::with_code(code));
        }
    }
}

#[async_trait]
impl Task for FakeTask {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&self) -> RuntimeResult<ExitWait> {
        self.calls.lock().unwrap().push(Call::Wait(self.id.clone()));
        let (tx, wait) = ExitWait::channel();
        *self.exit.lock().unwrap() = Some(tx);
        Ok(wait)
    }

    async fn start(&self) -> RuntimeResult<()> {
        self.calls.lock().unwrap().push(Call::Start(self.id.clone()));

        if self.behaviour.fail_start {
            return Err(RuntimeError::CommandFailed {
                command: "runc start".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "exec format error".to_string(),
            });
        }

        if let Some(code) = self.behaviour.exit_on_start {
            self.exit_with(code);
        }
        Ok(())
    }

    async fn kill(&self, signal: Signal) -> RuntimeResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Kill(self.id.clone(), signal));

        if self.behaviour.fail_kill {
            return Err(RuntimeError::CommandFailed {
                command: "runc kill".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "operation not permitted".to_string(),
            });
        }

        if self.behaviour.ignored_signal != Some(signal) {
            self.exit_with(128 + signal as i32);
        }
        Ok(())
    }

    async fn delete(&self) -> RuntimeResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::TaskDelete(self.id.clone()));

        if self.behaviour.fail_deletes {
            return Err(delete_failure("runc delete"));
        }
        Ok(())
    }
}

fn delete_failure(command: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "device or resource busy".to_string(),
    }
}

/// A directory holding an executable `netns`.
pub fn netns_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("netns");
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").expect("Failed to write netns");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    dir
}

/// Spec builder resolving `netns` only inside `dir`.
pub fn spec_builder(dir: &TempDir) -> SpecBuilder {
    SpecBuilder::with_hook_search_path(dir.path())
}

/// A validated deployment with a supervision window of `window`.
pub fn deployment(service: &str, image: &str, window: Duration) -> Deployment {
    let mut deployment = DeploymentRequest::new(service, image)
        .validate("docker.io", &DeployConfig::default())
        .expect("valid request");
    deployment.supervision.window = window;
    deployment.supervision.grace = Duration::from_millis(200);
    deployment
}
