// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! containerd binding driven through the `ctr` and `runc` command lines.
//!
//! Images, snapshots and container records live in containerd and are
//! managed with `ctr`. Tasks are run directly with `runc` from a bundle
//! directory under the configured state directory:
//!
//! ```text
//! <state_dir>/<namespace>/<id>/config.json
//! <state_dir>/<namespace>/<id>/rootfs        (snapshot mounted here)
//! <state_dir>/runc/<namespace>               (runc --root)
//! ```

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use nix::sys::signal::Signal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::oci::Spec;
use crate::runtime::{
    Container, ExitStatus, ExitWait, ImageConfig, PulledImage, RuntimeClient, SnapshotCleanup,
    Task, TaskIo,
};
use crate::types::{ImageRef, ServiceName};

const MOUNT_BINARY: &str = "mount";
const UMOUNT_BINARY: &str = "umount";

// =============================================================================
// Client
// =============================================================================

/// Runtime client for a containerd daemon listening on a unix socket.
pub struct CtrClient {
    ctr: Ctr,
    runc_binary: PathBuf,
    state_dir: PathBuf,
    poll_interval: Duration,
    /// Resolved image metadata keyed by `namespace/digest`.
    images: DashMap<String, Arc<PulledImage>>,
}

impl CtrClient {
    /// Connect to the daemon at `address`.
    ///
    /// Fails with `RuntimeError::Unreachable` if the daemon does not answer
    /// a version query.
    pub async fn connect(address: impl Into<String>, config: &RuntimeConfig) -> RuntimeResult<Self> {
        let ctr = Ctr {
            binary: config.ctr_binary.clone(),
            address: address.into(),
        };

        let version = run(&ctr.binary, ctr.args(None, ["version"]), "daemon", &ctr.address)
            .await
            .map_err(|e| RuntimeError::Unreachable {
                address: ctr.address.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            address = %ctr.address,
            version = %version.lines().find(|l| l.trim_start().starts_with("Version")).unwrap_or("unknown").trim(),
            state_dir = %config.state_dir.display(),
            "Connected to containerd"
        );

        Ok(Self {
            ctr,
            runc_binary: config.runc_binary.clone(),
            state_dir: config.state_dir.clone(),
            poll_interval: config.poll_interval,
            images: DashMap::new(),
        })
    }

    /// Address of the daemon socket.
    pub fn address(&self) -> &str {
        &self.ctr.address
    }

    fn bundle_dir(&self, namespace: &str, id: &str) -> PathBuf {
        self.state_dir.join(namespace).join(id)
    }

    fn runc(&self, namespace: &str) -> Runc {
        Runc {
            binary: self.runc_binary.clone(),
            root: self.state_dir.join("runc").join(namespace),
        }
    }

    async fn content(&self, namespace: &str, digest: &str) -> RuntimeResult<String> {
        self.ctr
            .run(namespace, ["content", "get", digest], "content", digest)
            .await
    }

    async fn content_json<T: for<'de> Deserialize<'de>>(
        &self,
        namespace: &str,
        digest: &str,
    ) -> RuntimeResult<T> {
        let raw = self.content(namespace, digest).await?;
        serde_json::from_str(&raw).map_err(|e| RuntimeError::MalformedOutput {
            command: format!("ctr content get {}", digest),
            reason: e.to_string(),
        })
    }

    /// Walk index → manifest → config for the image at `digest`.
    async fn resolve_image(
        &self,
        namespace: &str,
        name: &str,
        digest: &str,
    ) -> RuntimeResult<PulledImage> {
        let mut manifest: Manifest = self.content_json(namespace, digest).await?;

        if !manifest.manifests.is_empty() {
            let arch = oci_architecture();
            let platform = manifest
                .manifests
                .iter()
                .find(|m| {
                    m.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == arch)
                })
                .ok_or_else(|| RuntimeError::NotFound {
                    kind: "platform manifest",
                    id: format!("{} (linux/{})", name, arch),
                })?;
            manifest = self.content_json(namespace, &platform.digest).await?;
        }

        let config = manifest.config.ok_or_else(|| RuntimeError::MalformedOutput {
            command: format!("ctr content get {}", digest),
            reason: "manifest has no config descriptor".to_string(),
        })?;
        let image: OciImage = self.content_json(namespace, &config.digest).await?;

        let size = config.size + manifest.layers.iter().map(|l| l.size).sum::<u64>();
        Ok(PulledImage {
            name: name.to_string(),
            digest: digest.to_string(),
            size,
            config: image.into_config(),
        })
    }

    /// Undo a partially created container.
    async fn rollback(&self, namespace: &str, snapshot: &str, bundle: &Path, mounted: bool) {
        if mounted {
            if let Err(e) = run(UMOUNT_BINARY, [bundle.join("rootfs")], "mount", snapshot).await {
                tracing::warn!(snapshot = %snapshot, error = %e, "Rollback unmount failed");
            }
        }
        if let Err(e) = self
            .ctr
            .run(namespace, ["snapshots", "rm", snapshot], "snapshot", snapshot)
            .await
        {
            tracing::warn!(snapshot = %snapshot, error = %e, "Rollback snapshot removal failed");
        }
        if let Err(e) = tokio::fs::remove_dir_all(bundle).await {
            tracing::warn!(bundle = %bundle.display(), error = %e, "Rollback bundle removal failed");
        }
    }

    async fn materialise(
        &self,
        namespace: &str,
        id: &str,
        snapshot: &str,
        bundle: &Path,
        spec: &Spec,
    ) -> (bool, RuntimeResult<()>) {
        let rootfs = bundle.join("rootfs");
        if let Err(e) = tokio::fs::create_dir_all(&rootfs).await {
            return (false, Err(io_error("creating bundle rootfs", e)));
        }

        let mounts = match self
            .ctr
            .run(
                namespace,
                [
                    OsStr::new("snapshots"),
                    OsStr::new("mounts"),
                    rootfs.as_os_str(),
                    OsStr::new(snapshot),
                ],
                "snapshot",
                snapshot,
            )
            .await
        {
            Ok(output) => parse_mount_commands(&output),
            Err(e) => return (false, Err(e)),
        };

        for args in &mounts {
            if let Err(e) = run(MOUNT_BINARY, args, "mount", snapshot).await {
                return (false, Err(e));
            }
        }

        let config_path = bundle.join("config.json");
        let encoded = match serde_json::to_vec_pretty(spec) {
            Ok(encoded) => encoded,
            Err(e) => {
                return (
                    true,
                    Err(RuntimeError::Io {
                        context: "encoding runtime spec",
                        reason: e.to_string(),
                    }),
                )
            }
        };
        if let Err(e) = tokio::fs::write(&config_path, encoded).await {
            return (true, Err(io_error("writing runtime spec", e)));
        }

        let create = self
            .ctr
            .run(
                namespace,
                [
                    OsStr::new("containers"),
                    OsStr::new("create"),
                    OsStr::new("--rootfs"),
                    OsStr::new("--config"),
                    config_path.as_os_str(),
                    rootfs.as_os_str(),
                    OsStr::new(id),
                ],
                "container",
                id,
            )
            .await;

        (true, create.map(|_| ()))
    }
}

#[async_trait]
impl RuntimeClient for CtrClient {
    fn name(&self) -> &str {
        "containerd"
    }

    async fn pull_and_unpack(
        &self,
        namespace: &str,
        image: &ImageRef,
    ) -> RuntimeResult<Arc<PulledImage>> {
        let reference = image.as_str();

        self.ctr
            .run(namespace, ["images", "pull", reference], "image", reference)
            .await?;

        let filter = format!("name=={}", reference);
        let listing = self
            .ctr
            .run(namespace, ["images", "ls", filter.as_str()], "image", reference)
            .await?;
        let digest = parse_image_digest(&listing, reference).ok_or_else(|| {
            RuntimeError::NotFound {
                kind: "image",
                id: reference.to_string(),
            }
        })?;

        let key = format!("{}/{}", namespace, digest);
        if let Some(cached) = self.images.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let pulled = Arc::new(self.resolve_image(namespace, reference, &digest).await?);
        self.images.insert(key, Arc::clone(&pulled));
        Ok(pulled)
    }

    async fn create_container(
        &self,
        namespace: &str,
        id: &ServiceName,
        image: &PulledImage,
        snapshot: &str,
        spec: &Spec,
    ) -> RuntimeResult<Arc<dyn Container>> {
        let id = id.as_str();

        if self
            .ctr
            .run(namespace, ["containers", "info", id], "container", id)
            .await
            .is_ok()
        {
            return Err(RuntimeError::AlreadyExists {
                kind: "container",
                id: id.to_string(),
            });
        }

        let parent = chain_id(&image.config.diff_ids);
        let mut prepare = vec!["snapshots", "prepare", snapshot];
        if let Some(parent) = parent.as_deref() {
            prepare.push(parent);
        }
        self.ctr.run(namespace, prepare, "snapshot", snapshot).await?;

        let bundle = self.bundle_dir(namespace, id);
        let (mounted, created) = self
            .materialise(namespace, id, snapshot, &bundle, spec)
            .await;
        if let Err(e) = created {
            self.rollback(namespace, snapshot, &bundle, mounted).await;
            return Err(e);
        }

        tracing::debug!(
            container = %id,
            snapshot = %snapshot,
            bundle = %bundle.display(),
            "Container created"
        );

        Ok(Arc::new(CtrContainer {
            id: id.to_string(),
            namespace: namespace.to_string(),
            snapshot: snapshot.to_string(),
            bundle,
            ctr: self.ctr.clone(),
            runc: self.runc(namespace),
            poll_interval: self.poll_interval,
        }))
    }
}

// =============================================================================
// Containers and Tasks
// =============================================================================

struct CtrContainer {
    id: String,
    namespace: String,
    snapshot: String,
    bundle: PathBuf,
    ctr: Ctr,
    runc: Runc,
    poll_interval: Duration,
}

#[async_trait]
impl Container for CtrContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_task(&self, io: TaskIo) -> RuntimeResult<Arc<dyn Task>> {
        tokio::fs::create_dir_all(&self.runc.root)
            .await
            .map_err(|e| io_error("creating runc root", e))?;

        let pid_file = self.bundle.join("init.pid");
        let args = self.runc.args([
            OsStr::new("create"),
            OsStr::new("--bundle"),
            self.bundle.as_os_str(),
            OsStr::new("--pid-file"),
            pid_file.as_os_str(),
            OsStr::new(&self.id),
        ]);

        let mut command = Command::new(&self.runc.binary);
        command.args(&args).stdin(Stdio::null());
        if io == TaskIo::Null {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        // The task keeps the stdio handles, so only the exit status is read.
        let status = command.status().await.map_err(|e| RuntimeError::Spawn {
            program: self.runc.binary.display().to_string(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            return Err(RuntimeError::CommandFailed {
                command: render(&self.runc.binary, &args),
                status: status.to_string(),
                stderr: String::new(),
            });
        }

        let pid = tokio::fs::read_to_string(&pid_file)
            .await
            .ok()
            .and_then(|raw| raw.trim().parse().ok());

        tracing::debug!(task = %self.id, pid = ?pid, "Task created");

        Ok(Arc::new(RuncTask {
            id: self.id.clone(),
            pid,
            runc: self.runc.clone(),
            poll_interval: self.poll_interval,
        }))
    }

    async fn delete(&self, snapshot: SnapshotCleanup) -> RuntimeResult<()> {
        let mut first_error = None;

        if let Err(e) = self
            .ctr
            .run(&self.namespace, ["containers", "delete", self.id.as_str()], "container", &self.id)
            .await
        {
            first_error.get_or_insert(e);
        }

        if let Err(e) = run(UMOUNT_BINARY, [self.bundle.join("rootfs")], "mount", &self.snapshot).await {
            first_error.get_or_insert(e);
        }

        if snapshot == SnapshotCleanup::Remove {
            if let Err(e) = self
                .ctr
                .run(
                    &self.namespace,
                    ["snapshots", "rm", self.snapshot.as_str()],
                    "snapshot",
                    &self.snapshot,
                )
                .await
            {
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.bundle).await {
            first_error.get_or_insert(io_error("removing bundle", e));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct RuncTask {
    id: String,
    pid: Option<u32>,
    runc: Runc,
    poll_interval: Duration,
}

#[async_trait]
impl Task for RuncTask {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&self) -> RuntimeResult<ExitWait> {
        let (mut tx, wait) = ExitWait::channel();
        let runc = self.runc.clone();
        let id = self.id.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                match runc.state(&id).await {
                    Ok(state) if state.status != "stopped" => continue,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(task = %id, error = %e, "Task state unavailable, treating as exited");
                    }
                }

                let _ = tx.send(ExitStatus::unknown());
                return;
            }
        });

        Ok(wait)
    }

    async fn start(&self) -> RuntimeResult<()> {
        self.runc.run(["start", self.id.as_str()], &self.id).await?;
        Ok(())
    }

    async fn kill(&self, signal: Signal) -> RuntimeResult<()> {
        self.runc
            .run(["kill", self.id.as_str(), signal.as_str()], &self.id)
            .await?;
        Ok(())
    }

    async fn delete(&self) -> RuntimeResult<()> {
        self.runc.run(["delete", "--force", self.id.as_str()], &self.id).await?;
        Ok(())
    }
}

// =============================================================================
// Command Plumbing
// =============================================================================

#[derive(Debug, Clone)]
struct Ctr {
    binary: PathBuf,
    address: String,
}

impl Ctr {
    fn args<I, S>(&self, namespace: Option<&str>, args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut all: Vec<OsString> = vec!["--address".into(), self.address.clone().into()];
        if let Some(namespace) = namespace {
            all.push("--namespace".into());
            all.push(namespace.into());
        }
        all.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        all
    }

    async fn run<I, S>(
        &self,
        namespace: &str,
        args: I,
        kind: &'static str,
        id: &str,
    ) -> RuntimeResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run(&self.binary, self.args(Some(namespace), args), kind, id).await
    }
}

#[derive(Debug, Clone)]
struct Runc {
    binary: PathBuf,
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RuncState {
    status: String,
}

impl Runc {
    fn args<I, S>(&self, args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut all: Vec<OsString> = vec!["--root".into(), self.root.clone().into()];
        all.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        all
    }

    async fn run<I, S>(&self, args: I, id: &str) -> RuntimeResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run(&self.binary, self.args(args), "task", id).await
    }

    async fn state(&self, id: &str) -> RuntimeResult<RuncState> {
        let raw = self.run(["state", id], id).await?;
        serde_json::from_str(&raw).map_err(|e| RuntimeError::MalformedOutput {
            command: format!("runc state {}", id),
            reason: e.to_string(),
        })
    }
}

/// Run `program` to completion and return its stdout.
async fn run<P, I, S>(program: P, args: I, kind: &'static str, id: &str) -> RuntimeResult<String>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RuntimeError::Spawn {
            program: program.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_failure(
        render(program, &args),
        output.status.to_string(),
        stderr,
        kind,
        id,
    ))
}

fn render(program: impl AsRef<OsStr>, args: &[OsString]) -> String {
    std::iter::once(program.as_ref())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a failed command onto the runtime error taxonomy.
fn classify_failure(
    command: String,
    status: String,
    stderr: String,
    kind: &'static str,
    id: &str,
) -> RuntimeError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("already exists") {
        RuntimeError::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    } else if lowered.contains("not found") || lowered.contains("does not exist") {
        RuntimeError::NotFound {
            kind,
            id: id.to_string(),
        }
    } else {
        RuntimeError::CommandFailed {
            command,
            status,
            stderr,
        }
    }
}

fn io_error(context: &'static str, e: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        context,
        reason: e.to_string(),
    }
}

// =============================================================================
// Output Parsing
// =============================================================================

/// Identity of the snapshot holding all of an image's layers.
///
/// `chain[0] = diff[0]`, `chain[i] = sha256(chain[i-1] + " " + diff[i])`.
pub fn chain_id(diff_ids: &[String]) -> Option<String> {
    let (first, rest) = diff_ids.split_first()?;
    Some(rest.iter().fold(first.clone(), |parent, diff| {
        let digest = Sha256::digest(format!("{} {}", parent, diff).as_bytes());
        format!("sha256:{}", hex::encode(digest))
    }))
}

/// Find the digest column of `ctr images ls` for `reference`.
fn parse_image_digest(listing: &str, reference: &str) -> Option<String> {
    listing.lines().skip(1).find_map(|line| {
        let mut columns = line.split_whitespace();
        if columns.next()? != reference {
            return None;
        }
        columns
            .find(|c| c.starts_with("sha256:"))
            .map(str::to_string)
    })
}

/// Arguments for each `mount ...` line printed by `ctr snapshots mounts`.
fn parse_mount_commands(output: &str) -> Vec<Vec<String>> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            (words.next()? == MOUNT_BINARY).then(|| words.map(str::to_string).collect())
        })
        .collect()
}

/// GOARCH-style name of the host architecture.
fn oci_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    os: String,
    architecture: String,
}

/// Either an image index (`manifests`) or an image manifest (`config`).
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct OciImage {
    #[serde(default)]
    config: Option<OciProcessConfig>,
    #[serde(default)]
    rootfs: Option<OciRootFs>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OciProcessConfig {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OciRootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

impl OciImage {
    fn into_config(self) -> ImageConfig {
        let process = self.config.unwrap_or_default();
        ImageConfig {
            entrypoint: process.entrypoint.unwrap_or_default(),
            cmd: process.cmd.unwrap_or_default(),
            env: process.env.unwrap_or_default(),
            working_dir: process.working_dir,
            user: process.user,
            diff_ids: self.rootfs.map(|r| r.diff_ids).unwrap_or_default(),
        }
    }
}
