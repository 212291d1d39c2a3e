// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scoped LIFO cleanup of runtime resources.
//!
//! Every resource a deployment run creates registers its release step here
//! immediately after creation. Steps run in reverse registration order,
//! either explicitly through [`CleanupStack::unwind`] or, if the run is
//! aborted, from `Drop` on the current tokio runtime.

use std::future::Future;
use std::pin::Pin;

type CleanupStep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Ordered set of pending cleanup steps for one deployment run.
pub struct CleanupStack {
    scope: String,
    steps: Vec<(&'static str, CleanupStep)>,
}

impl CleanupStack {
    /// Create an empty stack; `scope` labels its log lines.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            steps: Vec::new(),
        }
    }

    /// Register `step` to run before every previously registered step.
    ///
    /// Steps report their own failures; unwinding always continues.
    pub fn defer<F>(&mut self, name: &'static str, step: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(scope = %self.scope, step = name, "Cleanup registered");
        self.steps.push((name, Box::pin(step)));
    }

    /// Number of pending steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run all pending steps, most recently registered first.
    pub async fn unwind(mut self) {
        while let Some((name, step)) = self.steps.pop() {
            tracing::debug!(scope = %self.scope, step = name, "Running cleanup");
            step.await;
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if self.steps.is_empty() {
            return;
        }

        let steps = std::mem::take(&mut self.steps);
        let scope = std::mem::take(&mut self.scope);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    scope = %scope,
                    pending = steps.len(),
                    "Cleanup stack dropped before unwinding, finishing in background"
                );
                handle.spawn(async move {
                    for (name, step) in steps.into_iter().rev() {
                        tracing::debug!(scope = %scope, step = name, "Running cleanup");
                        step.await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    scope = %scope,
                    pending = steps.len(),
                    "Cleanup stack dropped outside a runtime, steps skipped"
                );
            }
        }
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("scope", &self.scope)
            .field(
                "steps",
                &self.steps.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Future<Output = ()> {
        let log = Arc::clone(log);
        async move {
            log.lock().unwrap().push(name);
        }
    }

    #[tokio::test]
    async fn test_unwind_is_lifo() {
        let log = recorder();
        let mut stack = CleanupStack::new("echo");
        stack.defer("container", push(&log, "container"));
        stack.defer("task", push(&log, "task"));
        assert_eq!(stack.len(), 2);

        stack.unwind().await;
        assert_eq!(*log.lock().unwrap(), vec!["task", "container"]);
    }

    #[tokio::test]
    async fn test_empty_unwind() {
        let stack = CleanupStack::new("echo");
        assert!(stack.is_empty());
        stack.unwind().await;
    }

    #[tokio::test]
    async fn test_drop_runs_pending_steps_in_background() {
        let log = recorder();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let mut stack = CleanupStack::new("echo");
        stack.defer("container", {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("container");
                let _ = done_tx.send(());
            }
        });
        stack.defer("task", push(&log, "task"));
        drop(stack);

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["task", "container"]);
    }

    #[tokio::test]
    async fn test_aborted_owner_still_cleans_up() {
        let log = recorder();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let owner = tokio::spawn({
            let log = Arc::clone(&log);
            async move {
                let mut stack = CleanupStack::new("echo");
                stack.defer("container", {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push("container");
                        let _ = done_tx.send(());
                    }
                });
                stack.defer("task", push(&log, "task"));
                std::future::pending::<()>().await;
                stack.unwind().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        owner.abort();

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["task", "container"]);
    }
}
