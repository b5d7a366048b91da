//! In-process host runtime backed by a dedicated thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{CommandProcessor, HostRuntime, HostTask};
use crate::error::{HostError, HostResult};

/// A [`HostRuntime`] that owns its host thread.
///
/// Tasks are executed one at a time, in submission order, against the
/// [`CommandProcessor`] moved onto the thread at spawn.
pub struct LocalHost {
    name: String,
    world_dir: PathBuf,
    task_tx: Mutex<Option<mpsc::UnboundedSender<HostTask>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalHost {
    /// Start the host thread
    pub fn spawn<P>(
        name: impl Into<String>,
        world_dir: impl AsRef<Path>,
        processor: P,
    ) -> std::io::Result<Arc<Self>>
    where
        P: CommandProcessor + Send + 'static,
    {
        let name = name.into();
        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<HostTask>();

        let thread_name = name.clone();
        let thread = thread::Builder::new()
            .name(format!("host-{}", name))
            .spawn(move || {
                debug!("[host:{}] Thread started", thread_name);
                let mut processor = processor;

                while let Some(task) = task_rx.blocking_recv() {
                    let run = catch_unwind(AssertUnwindSafe(|| task(&mut processor)));
                    if run.is_err() {
                        error!("[host:{}] Host task panicked", thread_name);
                    }
                }

                debug!("[host:{}] Thread exiting", thread_name);
            })?;

        info!("Host '{}' started", name);

        Ok(Arc::new(Self {
            name,
            world_dir: world_dir.as_ref().to_path_buf(),
            task_tx: Mutex::new(Some(task_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Stop accepting tasks, drain the queue and join the host thread.
    ///
    /// Must not be called from the host thread itself.
    pub fn stop(&self) {
        self.task_tx.lock().take();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.join().is_err() {
            error!("Host '{}' thread panicked", self.name);
        }
        info!("Host '{}' stopped", self.name);
    }

    /// Check if the host still accepts tasks
    pub fn is_running(&self) -> bool {
        self.task_tx.lock().is_some()
    }
}

impl HostRuntime for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn world_dir(&self) -> PathBuf {
        self.world_dir.clone()
    }

    fn submit(&self, task: HostTask) -> HostResult<()> {
        let guard = self.task_tx.lock();
        let task_tx = guard.as_ref().ok_or(HostError::Closed)?;
        task_tx.send(task).map_err(|_| HostError::Closed)
    }
}

impl Drop for LocalHost {
    fn drop(&mut self) {
        // Closing the queue lets the thread exit on its own
        self.task_tx.get_mut().take();
    }
}
