//! Entity logical name to collection (entity set) name lookup

use std::collections::HashMap;

use serde_json::Value;

/// Resolves an entity logical name (`account`) to its collection name (`accounts`)
pub trait CollectionNameResolver: Send + Sync {
    fn resolve_collection_name(&self, entity_name: &str) -> Option<String>;
}

impl<F> CollectionNameResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve_collection_name(&self, entity_name: &str) -> Option<String> {
        self(entity_name)
    }
}

/// In-memory resolver, usually filled from an `EntityDefinitions` response
#[derive(Debug, Clone, Default)]
pub struct EntityNameCache {
    collections: HashMap<String, String>,
}

impl EntityNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, logical_name: impl Into<String>, collection_name: impl Into<String>) {
        self.collections
            .insert(logical_name.into(), collection_name.into());
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Build from `GET EntityDefinitions?$select=LogicalName,EntitySetName`
    pub fn from_entity_definitions(response: &Value) -> Self {
        let mut cache = Self::new();
        let definitions = response
            .get("value")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for definition in definitions {
            let logical = definition.get("LogicalName").and_then(Value::as_str);
            let set = definition.get("EntitySetName").and_then(Value::as_str);
            if let (Some(logical), Some(set)) = (logical, set) {
                cache.insert(logical, set);
            }
        }

        cache
    }
}

impl CollectionNameResolver for EntityNameCache {
    fn resolve_collection_name(&self, entity_name: &str) -> Option<String> {
        if let Some(collection) = self.collections.get(entity_name) {
            return Some(collection.clone());
        }
        // Already a collection name
        self.collections
            .values()
            .find(|collection| collection.as_str() == entity_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_entity_definitions() {
        let cache = EntityNameCache::from_entity_definitions(&json!({
            "value": [
                {"LogicalName": "account", "EntitySetName": "accounts"},
                {"LogicalName": "systemuser", "EntitySetName": "systemusers"},
                {"LogicalName": "broken"}
            ]
        }));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resolve_collection_name("account").as_deref(), Some("accounts"));
        assert_eq!(cache.resolve_collection_name("accounts").as_deref(), Some("accounts"));
        assert_eq!(cache.resolve_collection_name("contact"), None);
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |name: &str| (name == "lead").then(|| "leads".to_string());
        assert_eq!(resolver.resolve_collection_name("lead").as_deref(), Some("leads"));
        assert_eq!(resolver.resolve_collection_name("contact"), None);
    }
}
