// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! OCI runtime specification construction.
//!
//! Composes an image's declared configuration with runtime defaults and the
//! network-namespace prestart hook into one `config.json` value.

mod hook;
mod spec;

pub use hook::{NetnsHook, NETNS_BINARY};
pub use spec::{
    Hook, Hooks, LinuxConfig, LinuxNamespace, Mount, Process, Root, Spec, SpecBuilder, User,
    OCI_VERSION,
};
