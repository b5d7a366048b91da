//! Error types for the script engine adapter.

/// Errors that can occur while selecting or running a script engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("No script engine available (tried: {})", .tried.join(", "))]
    Unavailable { tried: Vec<String> },

    #[error("Failed to create engine: {0}")]
    Creation(String),

    #[error("{0}")]
    Eval(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Failed to install binding '{name}': {reason}")]
    Binding { name: String, reason: String },

    #[error("Script execution was interrupted")]
    Interrupted,
}

impl EngineError {
    /// Whether this error was caused by a cancellation request
    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
