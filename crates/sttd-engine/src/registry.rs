use crate::engine_trait::SttEngine;
use std::collections::HashMap;
use sttd_core::{EngineDescriptor, SttError};

type EngineFactory = Box<dyn Fn() -> Box<dyn SttEngine> + Send + Sync>;

/// Registration table of engine plugins.
///
/// Registration is the single entry point for a plugin: it hands over a
/// factory for the required capability set ([`SttEngine`]); optional
/// capabilities are probed on the instance. The descriptor is snapshotted
/// at registration so metadata queries never instantiate an engine.
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
    descriptors: HashMap<String, EngineDescriptor>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            descriptors: HashMap::new(),
        };
        registry.register(|| Box::new(crate::null_engine::NullEngine::new()));
        registry
    }

    /// Empty registry, for hosts that register their own plugins only.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            descriptors: HashMap::new(),
        }
    }

    /// Register an engine plugin. The id is taken from the descriptor;
    /// re-registering an id replaces the previous plugin.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn SttEngine> + Send + Sync + 'static,
    {
        let descriptor = factory().descriptor();
        let id = descriptor.id.clone();
        tracing::debug!(engine = %id, "registered engine plugin");
        self.descriptors.insert(id.clone(), descriptor);
        self.factories.insert(id, Box::new(factory));
    }

    pub fn create(&self, id: &str) -> Result<Box<dyn SttEngine>, SttError> {
        self.factories
            .get(id)
            .map(|f| f())
            .ok_or_else(|| SttError::EngineNotAvailable(id.to_string()))
    }

    pub fn descriptor(&self, id: &str) -> Result<&EngineDescriptor, SttError> {
        self.descriptors
            .get(id)
            .ok_or_else(|| SttError::EngineNotAvailable(id.to_string()))
    }

    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullEngine;

    #[test]
    fn test_registry_new_has_null_engine() {
        let registry = EngineRegistry::new();
        assert!(registry.contains("null"));
        assert!(registry.create("null").is_ok());
    }

    #[test]
    fn test_registry_create_unknown_returns_error() {
        let registry = EngineRegistry::new();
        match registry.create("nope") {
            Err(SttError::EngineNotAvailable(id)) => assert_eq!(id, "nope"),
            _ => panic!("expected EngineNotAvailable"),
        }
    }

    #[test]
    fn test_registry_descriptor_snapshot() {
        let registry = EngineRegistry::new();
        let desc = registry.descriptor("null").unwrap();
        assert_eq!(desc.id, "null");
        assert!(desc.supports_language("en-US"));
    }

    #[test]
    fn test_registry_descriptors_sorted_by_id() {
        let mut registry = EngineRegistry::empty();
        registry.register(|| Box::new(NullEngine::new()));
        let all = registry.descriptors();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "null");
    }

    #[test]
    fn test_registry_empty_has_no_engines() {
        let registry = EngineRegistry::empty();
        assert!(!registry.contains("null"));
        assert!(registry.descriptor("null").is_err());
    }
}
