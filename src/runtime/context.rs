use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::application::OwnerToken;
use crate::deps::{ContextContainer, ContextProvider};

/// Context providers keyed by name, each attributed to the plugin that
/// registered it. A later registration under the same name replaces the
/// earlier one. Clone to share across threads.
#[derive(Clone, Default)]
pub struct InMemoryContextContainer {
    providers: Arc<RwLock<IndexMap<String, (OwnerToken, ContextProvider)>>>,
}

impl InMemoryContextContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registered_by(&self, context_name: &str) -> Option<OwnerToken> {
        self.providers
            .read()
            .ok()
            .and_then(|guard| guard.get(context_name).map(|(owner, _)| owner.clone()))
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ContextContainer for InMemoryContextContainer {
    fn register_context(&self, owner: &OwnerToken, context_name: &str, provider: ContextProvider) {
        if let Ok(mut guard) = self.providers.write() {
            guard.insert(context_name.to_string(), (owner.clone(), provider));
        }
    }

    /// Evaluates every provider on behalf of `owner`.
    fn context_for(&self, owner: &OwnerToken) -> Map<String, Value> {
        // Providers are user code; run them without holding the lock.
        let providers: Vec<(String, ContextProvider)> = match self.providers.read() {
            Ok(guard) => guard
                .iter()
                .map(|(name, (_, provider))| (name.clone(), Arc::clone(provider)))
                .collect(),
            Err(_) => return Map::new(),
        };
        providers
            .into_iter()
            .map(|(name, provider)| (name, provider(owner)))
            .collect()
    }
}

impl std::fmt::Debug for InMemoryContextContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContextContainer")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn providers_are_evaluated_for_the_requesting_owner() {
        let container = InMemoryContextContainer::new();
        let core = OwnerToken::new("core");
        container.register_context(
            &core,
            "requester",
            Arc::new(|owner: &OwnerToken| json!(owner.label())),
        );
        let plugin = OwnerToken::new("plugin-a");
        let context = container.context_for(&plugin);
        assert_eq!(context["requester"], json!("plugin-a"));
        assert_eq!(container.registered_by("requester"), Some(core));
    }

    #[test]
    fn later_registration_replaces_provider() {
        let container = InMemoryContextContainer::new();
        let owner = OwnerToken::new("core");
        container.register_context(&owner, "value", Arc::new(|_: &OwnerToken| json!(1)));
        container.register_context(&owner, "value", Arc::new(|_: &OwnerToken| json!(2)));
        assert_eq!(container.names(), vec!["value".to_string()]);
        assert_eq!(container.context_for(&owner)["value"], json!(2));
    }

    #[test]
    fn empty_container_yields_empty_context() {
        let container = InMemoryContextContainer::new();
        assert!(container.context_for(&OwnerToken::new("x")).is_empty());
    }
}
