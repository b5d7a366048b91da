//! Named values injected into a script's global scope.

use std::sync::Arc;

use serde_json::Value;

/// A host-side object whose methods are callable from script code.
///
/// Arguments and return values cross the engine boundary as JSON. An `Err`
/// is raised inside the script as an exception carrying the message.
pub trait HostObject: Send + Sync {
    /// Method names exposed to scripts
    fn methods(&self) -> &[&'static str];

    /// Invoke `method` with the script-supplied arguments
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, String>;
}

/// A single binding value.
#[derive(Clone)]
pub enum Binding {
    /// A plain data value
    Value(Value),
    /// An object backed by host code
    Object(Arc<dyn HostObject>),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Binding::Object(object) => f.debug_tuple("Object").field(&object.methods()).finish(),
        }
    }
}

/// Ordered set of bindings. Re-binding a name replaces the earlier value.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<(String, Binding)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a plain value
    pub fn put_value(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.put(name, Binding::Value(value))
    }

    /// Bind a host object
    pub fn put_object(&mut self, name: impl Into<String>, object: Arc<dyn HostObject>) -> &mut Self {
        self.put(name, Binding::Object(object))
    }

    pub fn put(&mut self, name: impl Into<String>, binding: Binding) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = binding,
            None => self.entries.push((name, binding)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, binding)| binding)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.entries.iter().map(|(name, binding)| (name.as_str(), binding))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
