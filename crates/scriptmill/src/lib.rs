//! Scriptmill - Script Lifecycle Manager
//!
//! This crate loads named scripts from a world directory and runs each one
//! on its own execution unit inside a fresh script engine:
//! - Script storage via [`store`]
//! - Per-execution harness and binding objects via [`context`] and [`api`]
//! - Registry and start/stop lifecycle via [`manager`]
//! - Host-thread marshaling via [`host`]
//! - Operator commands via [`commands`]

pub use scriptmill_engine as engine;

pub mod api;
pub mod commands;
pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod host;
pub mod manager;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ScriptingConfig, ScriptmillConfig};
pub use context::{ExecutionContext, ScriptState};
pub use error::{ManagerError, ManagerResult, StoreError, StoreResult};
pub use host::{HostBridge, HostHandle, HostRuntime, LocalHost};
pub use manager::{ScriptDescriptor, ScriptManager};
pub use store::ScriptStore;
