//! Controller Engine (§4.G): the process-wide registry of dynamically
//! started child controllers, one per defined composite or claim kind.
//!
//! Mirrors the teacher's `spawn_blocking_with_tracing` habit of keeping
//! task spawning itself thin and pushing behavior into the spawned
//! future: `start` owns lifecycle (idempotency, cancellation, draining),
//! the caller owns what actually runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handed to a controller's run future so it can tell when to stop
/// picking up new work and wind down.
#[derive(Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once `stop` has been called for this controller.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }
}

struct Handle {
    config_key: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The registry itself. Cloneable; every clone shares the same map, the
/// way the teacher shares `Arc`-wrapped state across request-scoped
/// tasks.
#[derive(Clone, Default)]
pub struct ControllerEngine {
    handles: Arc<Mutex<HashMap<String, Handle>>>,
}

impl ControllerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.handles.lock().await.contains_key(name)
    }

    /// Start a controller under `name`, running `run` as its worker
    /// future. `config_key` captures whatever would make two starts
    /// "the same configuration" (e.g. the composed GVK plus Composition
    /// name) — identical key on an already-running name is a no-op,
    /// differing key stops the old task and starts a fresh one.
    pub async fn start<F, Fut>(&self, name: &str, config_key: &str, run: F)
    where
        F: FnOnce(Cancellation) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().await;
        if let Some(existing) = handles.get(name) {
            if existing.config_key == config_key {
                return;
            }
            info!(controller = name, "restarting with new configuration");
            Self::stop_handle(handles.remove(name).unwrap()).await;
        }

        let (tx, rx) = watch::channel(false);
        let cancellation = Cancellation(rx);
        let task = tokio::spawn(run(cancellation));
        handles.insert(
            name.to_string(),
            Handle {
                config_key: config_key.to_string(),
                cancel: tx,
                task,
            },
        );
        info!(controller = name, "started");
    }

    /// Cancel the controller's context and wait for its worker to drain.
    pub async fn stop(&self, name: &str) {
        let handle = self.handles.lock().await.remove(name);
        if let Some(handle) = handle {
            Self::stop_handle(handle).await;
            info!(controller = name, "stopped");
        }
    }

    async fn stop_handle(handle: Handle) {
        let _ = handle.cancel.send(true);
        if let Err(err) = handle.task.await {
            warn!(error = %err, "controller task panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn start_is_idempotent_for_identical_config() {
        let engine = ControllerEngine::new();
        let starts = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let starts = starts.clone();
            engine
                .start("xdatabases.example.org", "composition-a", move |mut cancel| async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    cancel.cancelled().await;
                })
                .await;
        }
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(engine.is_running("xdatabases.example.org").await);
        engine.stop("xdatabases.example.org").await;
        assert!(!engine.is_running("xdatabases.example.org").await);
    }

    #[tokio::test]
    async fn differing_config_restarts() {
        let engine = ControllerEngine::new();
        let cancelled_first = Arc::new(AtomicUsize::new(0));
        let marker = cancelled_first.clone();
        engine
            .start("xdatabases.example.org", "composition-a", move |mut cancel| async move {
                cancel.cancelled().await;
                marker.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        engine
            .start("xdatabases.example.org", "composition-b", |mut cancel| async move {
                cancel.cancelled().await;
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cancelled_first.load(Ordering::SeqCst), 1);
        engine.stop("xdatabases.example.org").await;
    }

    #[tokio::test]
    async fn stop_on_unknown_name_is_a_no_op() {
        let engine = ControllerEngine::new();
        engine.stop("never-started").await;
    }
}
