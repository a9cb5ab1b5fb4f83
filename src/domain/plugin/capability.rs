//! Capability registry
//!
//! Plugins contribute named, typed bundles of extra operations. Callers look
//! them up by name and concrete type instead of relying on members injected
//! into the service.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// A named capability contributed by a plugin
#[derive(Clone)]
pub struct Capability {
    name: String,
    value: Arc<dyn Any + Send + Sync>,
}

impl Capability {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, value: Arc<T>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name-indexed capabilities; later registrations replace earlier ones
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability, returning true if it replaced one of the same name
    pub fn insert(&mut self, capability: Capability) -> bool {
        let replaced = self
            .entries
            .insert(capability.name.clone(), capability.value)
            .is_some();

        if replaced {
            debug!(capability = %capability.name, "Capability replaced by later plugin");
        }

        replaced
    }

    /// Look up a capability by name and type
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}
