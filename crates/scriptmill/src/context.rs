//! Execution Context
//!
//! One script execution: selects an engine, installs bindings, evaluates the
//! source and invokes the script's entry point. Runs synchronously on the
//! execution unit the manager spawned for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use scriptmill_engine::{Bindings, CancelToken, EngineCatalog, EngineResult};

use crate::api::{GlobalApi, ScriptConsole, ScriptContextApi, ServerApi};
use crate::error::ScriptFailure;
use crate::host::HostBridge;

/// Entry points looked up after evaluation, in order, with the binding each
/// one receives as its argument.
pub const ENTRY_POINTS: &[(&str, &str)] = &[("main", "c"), ("handler", "context"), ("init", "c")];

// ─────────────────────────────────────────────────────────────────────────────
// Script State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a script execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ScriptState {
    /// Accepted, harness not yet entered
    Starting = 0,
    /// Evaluating or inside the entry point
    Running = 1,
    /// Finished normally
    Completed = 2,
    /// Evaluation raised an error
    Failed = 3,
    /// Stopped on request
    Stopped = 4,
}

impl ScriptState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Stopped,
        }
    }

    /// Check if the execution has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScriptState::Completed | ScriptState::Failed | ScriptState::Stopped
        )
    }
}

impl std::fmt::Display for ScriptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptState::Starting => write!(f, "starting"),
            ScriptState::Running => write!(f, "running"),
            ScriptState::Completed => write!(f, "completed"),
            ScriptState::Failed => write!(f, "failed"),
            ScriptState::Stopped => write!(f, "stopped"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable control handle for a running [`ExecutionContext`]
#[derive(Debug, Clone, Default)]
pub struct ContextHandle {
    state: Arc<AtomicU8>,
    cancel: CancelToken,
}

impl ContextHandle {
    pub fn state(&self) -> ScriptState {
        ScriptState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Request the execution to stop.
    ///
    /// Sets the cancel flag, which aborts running script code and wakes any
    /// blocking wait, and marks the execution `Stopped`.
    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (!ScriptState::from_u8(current).is_terminal()).then_some(ScriptState::Stopped as u8)
            });
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Move from `from` to `to`; fails if the state changed underneath
    fn transition(&self, from: ScriptState, to: ScriptState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record the final state. A stop request always wins.
    fn finish(&self, state: ScriptState) -> ScriptState {
        let state = if self.is_stop_requested() {
            ScriptState::Stopped
        } else {
            state
        };
        self.state.store(state as u8, Ordering::SeqCst);
        state
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Context
// ─────────────────────────────────────────────────────────────────────────────

pub struct ExecutionContext {
    name: String,
    source: String,
    bridge: HostBridge,
    catalog: Arc<EngineCatalog>,
    handle: ContextHandle,
}

impl ExecutionContext {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        bridge: HostBridge,
        catalog: Arc<EngineCatalog>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            bridge,
            catalog,
            handle: ContextHandle::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ScriptState {
        self.handle.state()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Run the script to completion and return its final state.
    ///
    /// Errors never escape: a failure is logged and broadcast to the host as
    /// `Script error in <name>: <message>`. A stopped execution ends in
    /// [`ScriptState::Stopped`] and is not reported as an error.
    pub fn execute(&self) -> ScriptState {
        if !self.handle.transition(ScriptState::Starting, ScriptState::Running) {
            debug!(script = %self.name, "Stopped before start");
            return self.handle.finish(ScriptState::Stopped);
        }

        info!(script = %self.name, "Executing script");

        let state = match self.run() {
            Ok(()) => ScriptState::Completed,
            Err(e) if e.is_interrupted() || self.handle.is_stop_requested() => {
                debug!(script = %self.name, "Script interrupted");
                ScriptState::Stopped
            }
            Err(e) => {
                let failure = ScriptFailure {
                    name: self.name.clone(),
                    source: e,
                };
                error!(script = %self.name, error = %failure.source, "Script failed");
                self.bridge.broadcast(&failure.to_string());
                ScriptState::Failed
            }
        };

        let state = self.handle.finish(state);
        info!(script = %self.name, %state, "Script finished");
        state
    }

    fn run(&self) -> EngineResult<()> {
        let mut engine = self.catalog.select(self.handle.cancel_token())?;
        debug!(script = %self.name, engine = engine.name(), "Engine selected");

        engine.evaluate(&self.source, &self.bindings())?;

        // No entry point means the top-level statements were the script
        match ENTRY_POINTS.iter().find(|(name, _)| engine.has_function(name)) {
            Some((entry, arg)) => {
                debug!(script = %self.name, entry, "Calling entry point");
                engine.call_function(entry, arg)
            }
            None => Ok(()),
        }
    }

    fn bindings(&self) -> Bindings {
        let context = Arc::new(ScriptContextApi::new(&self.name, self.bridge.clone()));

        let mut bindings = Bindings::new();
        bindings
            .put_object("server", Arc::new(ServerApi::new(self.bridge.clone())))
            .put_object(
                "global",
                Arc::new(GlobalApi::new(&self.name, self.handle.cancel_token().clone())),
            )
            .put_object("console", Arc::new(ScriptConsole::new(&self.name)))
            .put_object("c", context.clone())
            .put_object("context", context)
            .put_value("scriptName", Value::String(self.name.clone()));
        bindings
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
