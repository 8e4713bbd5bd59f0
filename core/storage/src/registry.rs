//! Store registry for resolving a backend by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::BlobStore;
use salecache_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobStore>> + Send + Sync>;

/// Registry for blob store factories.
///
/// Allows the persistence medium to be picked at runtime by name and
/// configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BlobStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> Result<StoreRegistry> {
    let mut registry = StoreRegistry::new();

    registry.register(
        "memory",
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryBlobStore::new()))),
    )?;

    registry.register(
        "local",
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local store requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalBlobStore::new(root)?))
        }),
    )?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry().unwrap();
        assert_eq!(registry.stores(), vec!["local".to_string(), "memory".to_string()]);

        let store = registry.resolve("memory", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry().unwrap();
        assert!(registry.resolve("local", Value::Null).is_err());

        let temp = TempDir::new().unwrap();
        let config = serde_json::json!({ "root": temp.path().to_string_lossy() });
        let store = registry.resolve("local", config).unwrap();
        assert_eq!(store.name(), "local");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StoreRegistry::new();
        registry
            .register("a", Box::new(|_| Ok(Arc::new(crate::MemoryBlobStore::new()))))
            .unwrap();
        let result =
            registry.register("a", Box::new(|_| Ok(Arc::new(crate::MemoryBlobStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = StoreRegistry::new();
        assert!(registry.resolve("gdrive", Value::Null).is_err());
    }
}
