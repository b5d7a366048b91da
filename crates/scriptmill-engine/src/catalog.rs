//! Engine selection.
//!
//! An [`EngineCatalog`] holds every engine implementation compiled into the
//! binary plus an ordered list of capability names to try. Selection happens
//! once per script execution.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{CancelToken, EngineError, EngineResult, ScriptEngine};

/// Capability names tried when no explicit preference list is configured.
pub const DEFAULT_ENGINE_PREFERENCES: &[&str] = &["quickjs", "javascript", "js"];

/// Constructor for one concrete engine implementation.
pub trait EngineFactory: Send + Sync {
    /// Primary capability name
    fn name(&self) -> &'static str;

    /// Additional capability names this factory answers to
    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    /// Whether the engine can be instantiated in this process
    fn is_available(&self) -> bool {
        true
    }

    /// Create a fresh engine. `cancel` aborts execution once triggered.
    fn create(&self, cancel: &CancelToken) -> EngineResult<Box<dyn ScriptEngine>>;

    /// Check if this factory answers to `capability` (case-insensitive)
    fn provides(&self, capability: &str) -> bool {
        self.name().eq_ignore_ascii_case(capability)
            || self
                .aliases()
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(capability))
    }
}

/// Registered engine factories and the order in which to try them.
pub struct EngineCatalog {
    factories: Vec<Arc<dyn EngineFactory>>,
    preferences: Vec<String>,
}

impl Default for EngineCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EngineCatalog {
    /// Create an empty catalog with the given preference order
    pub fn new<I, S>(preferences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            factories: Vec::new(),
            preferences: preferences.into_iter().map(Into::into).collect(),
        }
    }

    /// Catalog with all built-in engines and the default preference order
    pub fn with_defaults() -> Self {
        Self::with_preferences(DEFAULT_ENGINE_PREFERENCES.iter().copied())
    }

    /// Catalog with all built-in engines and a custom preference order
    pub fn with_preferences<I, S>(preferences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        #[allow(unused_mut)]
        let mut catalog = Self::new(preferences);

        #[cfg(feature = "quickjs")]
        catalog.register(Arc::new(crate::quickjs::QuickJsFactory));

        catalog
    }

    /// Register an engine factory
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn preferences(&self) -> &[String] {
        &self.preferences
    }

    /// Names of registered factories that report themselves available
    pub fn available(&self) -> Vec<&'static str> {
        self.factories
            .iter()
            .filter(|factory| factory.is_available())
            .map(|factory| factory.name())
            .collect()
    }

    /// Create an engine from the first usable capability in preference order.
    pub fn select(&self, cancel: &CancelToken) -> EngineResult<Box<dyn ScriptEngine>> {
        let mut tried = Vec::with_capacity(self.preferences.len());

        for capability in &self.preferences {
            tried.push(capability.clone());

            let Some(factory) = self.factories.iter().find(|f| f.provides(capability)) else {
                debug!(engine = %capability, "No factory registered for engine");
                continue;
            };

            if !factory.is_available() {
                debug!(engine = %capability, "Engine not available");
                continue;
            }

            match factory.create(cancel) {
                Ok(engine) => {
                    debug!(engine = factory.name(), requested = %capability, "Using script engine");
                    return Ok(engine);
                }
                Err(e) => {
                    warn!(engine = %capability, error = %e, "Failed to initialize script engine");
                }
            }
        }

        Err(EngineError::Unavailable { tried })
    }
}

impl std::fmt::Debug for EngineCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories: Vec<_> = self.factories.iter().map(|f| f.name()).collect();
        f.debug_struct("EngineCatalog")
            .field("factories", &factories)
            .field("preferences", &self.preferences)
            .finish()
    }
}
