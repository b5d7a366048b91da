//! Scriptmill Script Engine Adapter
//!
//! This crate abstracts the embeddable scripting runtime used to evaluate
//! script bodies. The rest of scriptmill only talks to the [`ScriptEngine`]
//! trait; which concrete engine backs it is decided at run time by probing an
//! [`EngineCatalog`] preference list.
//!
//! # Architecture
//!
//! - Every execution gets a fresh engine instance (no reuse across scripts)
//! - Host functionality is injected as [`Bindings`]: plain JSON values or
//!   [`HostObject`]s whose methods the script can call
//! - A [`CancelToken`] is handed to the engine at creation so a stop request
//!   can abort a busy script from another thread

mod bindings;
mod cancel;
mod catalog;
mod error;

#[cfg(feature = "quickjs")]
pub mod quickjs;

pub use bindings::{Binding, Bindings, HostObject};
pub use cancel::CancelToken;
pub use catalog::{EngineCatalog, EngineFactory, DEFAULT_ENGINE_PREFERENCES};
pub use error::{EngineError, EngineResult};

/// A single, stateless evaluation context.
///
/// Engines are created on the execution unit that uses them and are dropped
/// when the script finishes, so implementations do not need to be `Send`.
pub trait ScriptEngine {
    /// Capability name this engine was created under (e.g. "quickjs")
    fn name(&self) -> &str;

    /// Install `bindings` into the global scope and evaluate `source`.
    fn evaluate(&mut self, source: &str, bindings: &Bindings) -> EngineResult<()>;

    /// Check if a global function with the given name exists
    fn has_function(&self, name: &str) -> bool;

    /// Call a global function, passing the global binding named `arg_binding`
    /// as its single argument.
    fn call_function(&mut self, name: &str, arg_binding: &str) -> EngineResult<()>;
}
