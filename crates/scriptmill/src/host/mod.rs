//! Host Bridge
//!
//! The host owns a single authoritative thread on which all world-mutating
//! work must happen. Scripts run on their own threads, so every command or
//! broadcast they issue is marshaled onto the host thread as a [`HostTask`].
//!
//! # Architecture
//!
//! ```text
//! script thread ──HostBridge──► HostRuntime::submit ──► host thread
//!                  (waits ≤ command_timeout)            CommandProcessor
//! ```

mod local;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::HostResult;

pub use local::LocalHost;

// ─────────────────────────────────────────────────────────────────────────────
// Host Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Host-side command execution. Only ever touched from the host thread.
pub trait CommandProcessor {
    /// Run a host command, returning its numeric result (> 0 means success)
    fn perform_command(&mut self, command: &str) -> anyhow::Result<i32>;

    /// Send a message to every connected participant
    fn broadcast(&mut self, message: &str);
}

/// Work to run on the host thread
pub type HostTask = Box<dyn FnOnce(&mut dyn CommandProcessor) + Send>;

/// A running host instance.
pub trait HostRuntime: Send + Sync {
    /// Display name of the host
    fn name(&self) -> &str;

    /// Root directory of the host's persistent world data
    fn world_dir(&self) -> PathBuf;

    /// Queue `task` for execution on the host thread
    fn submit(&self, task: HostTask) -> HostResult<()>;
}

/// Shared handle to a host runtime
pub type HostHandle = Arc<dyn HostRuntime>;

/// Resolves the host runtime that is currently active, if any.
pub trait RuntimeLocator: Send + Sync {
    fn current(&self) -> Option<HostHandle>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Script-facing access to the host runtime.
#[derive(Clone)]
pub struct HostBridge {
    runtime: Option<HostHandle>,
    command_timeout: Duration,
}

impl HostBridge {
    pub fn new(runtime: Option<HostHandle>, command_timeout: Duration) -> Self {
        Self {
            runtime,
            command_timeout,
        }
    }

    /// A bridge with no host attached. Commands fail and broadcasts are dropped.
    pub fn detached() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn current_runtime(&self) -> Option<HostHandle> {
        self.runtime.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Execute a host command on the host thread.
    ///
    /// Blocks for at most the command timeout. Returns `true` only if the
    /// command finished in time with a result greater than zero.
    pub fn execute_command(&self, command: &str) -> bool {
        let Some(runtime) = &self.runtime else {
            warn!(command, "No host runtime to execute command");
            return false;
        };

        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let text = command.to_string();
        let task: HostTask = Box::new(move |processor| {
            let result = processor.perform_command(&text);
            let _ = result_tx.send(result);
        });

        if let Err(e) = runtime.submit(task) {
            warn!(command, error = %e, "Failed to submit command");
            return false;
        }

        match result_rx.recv_timeout(self.command_timeout) {
            Ok(Ok(result)) => result > 0,
            Ok(Err(e)) => {
                warn!(command, error = %e, "Command failed");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!(command, timeout = ?self.command_timeout, "Command did not finish in time");
                false
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Broadcast `message` to the host. Does not wait for delivery.
    pub fn broadcast(&self, message: &str) {
        let Some(runtime) = &self.runtime else {
            debug!("No host runtime, dropping broadcast: {}", message);
            return;
        };

        let text = message.to_string();
        if let Err(e) = runtime.submit(Box::new(move |processor| processor.broadcast(&text))) {
            warn!(error = %e, "Failed to submit broadcast");
        }
    }
}

impl std::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("runtime", &self.runtime.as_ref().map(|r| r.name().to_string()))
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}
