use indexmap::IndexMap;

use crate::application::{AppUpdater, ApplicationDefinition, OwnerToken};
use crate::error::{ConfigurationError, LifecycleError, Result};
use crate::observable::Observable;
use crate::routing::BasePath;

/// Definition plus registration-time facts.
#[derive(Debug, Clone)]
pub struct RegisteredApp {
    pub owner: OwnerToken,
    pub definition: ApplicationDefinition,
    /// Normalized route, always starting with `/`.
    pub route: String,
}

/// Immutable view of the registry once the registration window has closed.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub apps: IndexMap<String, RegisteredApp>,
    pub global_updaters: Vec<Observable<AppUpdater>>,
}

impl RegistrySnapshot {
    pub fn app_ids(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn get(&self, app_id: &str) -> Option<&RegisteredApp> {
        self.apps.get(app_id)
    }

    /// `(id, route)` pairs in registration order.
    pub fn route_table(&self) -> Vec<(String, String)> {
        self.apps
            .iter()
            .map(|(id, app)| (id.clone(), app.route.clone()))
            .collect()
    }
}

/// Collects application definitions until [`ApplicationRegistry::freeze`].
#[derive(Debug)]
pub struct ApplicationRegistry {
    apps: IndexMap<String, RegisteredApp>,
    global_updaters: Vec<Observable<AppUpdater>>,
    base_path: BasePath,
    route_prefix: String,
    frozen: bool,
}

impl ApplicationRegistry {
    pub fn new(base_path: BasePath, route_prefix: impl Into<String>) -> Self {
        Self {
            apps: IndexMap::new(),
            global_updaters: Vec::new(),
            base_path,
            route_prefix: route_prefix.into(),
            frozen: false,
        }
    }

    pub fn register(&mut self, owner: &OwnerToken, definition: ApplicationDefinition) -> Result<()> {
        if self.frozen {
            return Err(LifecycleError::RegisterAfterSetup.into());
        }
        if self.apps.contains_key(&definition.id) {
            return Err(ConfigurationError::DuplicateId(definition.id.clone()).into());
        }

        let route = normalize_route(&definition.resolved_route(&self.route_prefix));
        if self.apps.values().any(|app| app.route == route) {
            return Err(ConfigurationError::DuplicateRoute(route).into());
        }
        if self.collides_with_base_path(&route) {
            return Err(ConfigurationError::RouteUnderBasePath.into());
        }

        self.apps.insert(
            definition.id.clone(),
            RegisteredApp {
                owner: owner.clone(),
                definition,
                route,
            },
        );
        Ok(())
    }

    pub fn register_updater(&mut self, updater: Observable<AppUpdater>) -> Result<()> {
        if self.frozen {
            return Err(LifecycleError::UpdaterAfterSetup.into());
        }
        self.global_updaters.push(updater);
        Ok(())
    }

    /// Close the registration window. Later registrations fail.
    pub fn freeze(&mut self) -> RegistrySnapshot {
        self.frozen = true;
        RegistrySnapshot {
            apps: self.apps.clone(),
            global_updaters: self.global_updaters.clone(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    fn collides_with_base_path(&self, route: &str) -> bool {
        let base = self.base_path.server_base_path();
        if base.is_empty() {
            return false;
        }
        route == base
            || route
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

fn normalize_route(route: &str) -> String {
    let trimmed = route.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
