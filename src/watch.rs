//! Reload-on-removal directory watcher
//!
//! Kubernetes projects Secrets and ConfigMaps into a volume through a
//! `..data` symlink that is swapped atomically; the old timestamped directory
//! is then deleted. That deletion is the only event acted upon here. Plain
//! writes and creates are ignored, so a half-written file never triggers a
//! reload.
//!
//! ```text
//! notify callback ──try_send──▶ bounded queue ──▶ watch task
//!                                                  │ settle delay
//!                                                  │ drain queued events
//!                                                  └▶ Reload::reload()
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Error, Result, metrics};

/// Capacity of the queue between the OS watcher and the watch task
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Something that can re-read its source files
pub trait Reload: Send + Sync + 'static {
    /// Short name used in logs and metrics (`credential`, `config`)
    fn name(&self) -> &'static str;

    /// Re-read and publish; on error the previous value must stay current
    fn reload(&self) -> Result<()>;
}

/// Message from the notify callback to the watch task
#[derive(Debug)]
enum Signal {
    Removed(Vec<PathBuf>),
    Failed(String),
}

/// Handle to a running watch loop.
///
/// Dropping the handle stops the loop.
pub struct DirectoryWatch {
    dir: PathBuf,
    cancel: CancellationToken,
    watcher: Mutex<Option<RecommendedWatcher>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatch {
    /// Watch `dir` and call `target.reload()` after `settle` whenever an
    /// entry in it is removed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(dir: &Path, target: Arc<dyn Reload>, settle: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let watcher = create_watcher(dir, tx)?;
        let cancel = CancellationToken::new();

        info!(
            directory = %dir.display(),
            source = target.name(),
            "Watching for file replacement"
        );

        let task = tokio::spawn(run(target, rx, cancel.clone(), settle));

        Ok(Self {
            dir: dir.to_path_buf(),
            cancel,
            watcher: Mutex::new(Some(watcher)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop the loop and release the OS watch. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        // Dropping the watcher closes the notify channel as well
        drop(self.watcher.lock().take());
        debug!(directory = %self.dir.display(), "Directory watch stopped");
    }

    /// `true` while the background task is alive
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop and wait for the background task to exit
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for DirectoryWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn create_watcher(dir: &Path, tx: mpsc::Sender<Signal>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| {
            let signal = match result {
                Ok(event) if matches!(event.kind, EventKind::Remove(_)) => {
                    Signal::Removed(event.paths)
                }
                Ok(_) => return,
                Err(e) => Signal::Failed(e.to_string()),
            };
            // Never block the OS watcher thread; a full queue already holds a
            // pending reload
            if tx.try_send(signal).is_err() {
                debug!("Watch queue full or closed, dropping event");
            }
        },
    )
    .map_err(|e| Error::Watch(format!("Failed to create file watcher: {e}")))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Watch(format!("Failed to watch '{}': {e}", dir.display())))?;

    Ok(watcher)
}

async fn run(
    target: Arc<dyn Reload>,
    mut rx: mpsc::Receiver<Signal>,
    cancel: CancellationToken,
    settle: Duration,
) {
    loop {
        let signal = tokio::select! {
            () = cancel.cancelled() => break,
            signal = rx.recv() => signal,
        };

        match signal {
            Some(Signal::Removed(paths)) => {
                info!(source = target.name(), paths = ?paths, "Watched files replaced, reloading");

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(settle) => {}
                }

                // One reload covers every removal queued during the settle delay
                let mut failure = None;
                while let Ok(queued) = rx.try_recv() {
                    if let Signal::Failed(e) = queued {
                        failure = Some(e);
                        break;
                    }
                }

                reload(&target).await;

                if let Some(e) = failure {
                    watch_failed(target.name(), &e);
                    break;
                }
            }
            Some(Signal::Failed(e)) => {
                watch_failed(target.name(), &e);
                break;
            }
            None => {
                error!(source = target.name(), "Watch event channel closed");
                break;
            }
        }
    }

    debug!(source = target.name(), "Watch loop exited");
}

fn watch_failed(source: &'static str, error: &str) {
    error!(source, error, "File watcher failed, stopping watch");
    metrics::record_error("watch_error");
}

async fn reload(target: &Arc<dyn Reload>) {
    let name = target.name();
    let worker = Arc::clone(target);
    match tokio::task::spawn_blocking(move || worker.reload()).await {
        Ok(Ok(())) => {
            info!(source = name, "Reloaded successfully");
            metrics::record_reload(name);
        }
        Ok(Err(e)) => {
            error!(source = name, error = %e, "Reload failed, keeping previous value");
            metrics::record_error(e.metric_label());
        }
        Err(e) => {
            warn!(source = name, error = %e, "Reload task aborted");
        }
    }
}
