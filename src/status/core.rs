use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use blake3::Hash;
use indexmap::IndexMap;

use crate::application::{
    AppMap, AppStatus, AppUpdater, ApplicationDefinition, PublicAppInfo,
};
use crate::deps::CapabilitiesSnapshot;
use crate::logging::{LogLevel, Logger, TARGET_STATUS, emit, json_kv, json_str};
use crate::metrics::NavigationMetrics;
use crate::observable::{Observable, Subscription};
use crate::registry::RegistrySnapshot;

/// Which applications an updater stream applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdaterTarget {
    All,
    App(String),
}

/// One contributing updater stream.
#[derive(Debug, Clone)]
pub struct UpdaterSource {
    pub target: UpdaterTarget,
    pub stream: Observable<AppUpdater>,
}

impl UpdaterSource {
    pub fn global(stream: Observable<AppUpdater>) -> Self {
        Self {
            target: UpdaterTarget::All,
            stream,
        }
    }

    pub fn for_app(app_id: impl Into<String>, stream: Observable<AppUpdater>) -> Self {
        Self {
            target: UpdaterTarget::App(app_id.into()),
            stream,
        }
    }
}

#[derive(Clone, Default)]
pub struct StatusEngineConfig {
    pub logger: Option<Logger>,
    pub metrics: Option<Arc<Mutex<NavigationMetrics>>>,
}

#[derive(Default)]
struct Slots {
    own: HashMap<String, AppUpdater>,
    /// Latest value of each global source, in registration order.
    global: Vec<Option<AppUpdater>>,
    version: u64,
    ready: bool,
}

#[derive(Default)]
struct Published {
    fingerprint: Option<Hash>,
    version: u64,
}

struct EngineState {
    apps: IndexMap<String, (ApplicationDefinition, String)>,
    capabilities: CapabilitiesSnapshot,
    slots: Mutex<Slots>,
    published: Mutex<Published>,
    applications: Observable<Arc<AppMap>>,
    subscriptions: Mutex<Vec<Subscription>>,
    config: StatusEngineConfig,
}

/// Keeps the latest patch from every updater source and republishes the merged
/// application map whenever one of them changes.
pub struct StatusMergeEngine {
    state: Arc<EngineState>,
}

impl StatusMergeEngine {
    /// `apps` pairs each definition with its registered route.
    pub fn new(
        apps: impl IntoIterator<Item = (ApplicationDefinition, String)>,
        sources: Vec<UpdaterSource>,
        capabilities: CapabilitiesSnapshot,
        config: StatusEngineConfig,
    ) -> Self {
        let apps: IndexMap<String, (ApplicationDefinition, String)> = apps
            .into_iter()
            .map(|(definition, route)| (definition.id.clone(), (definition, route)))
            .collect();

        let state = Arc::new(EngineState {
            apps,
            capabilities,
            slots: Mutex::new(Slots::default()),
            published: Mutex::new(Published::default()),
            applications: Observable::new(Arc::new(AppMap::new())),
            subscriptions: Mutex::new(Vec::new()),
            config,
        });

        let mut subscriptions = Vec::with_capacity(sources.len());
        let mut global_index = 0;
        for source in sources {
            let slot = match source.target {
                UpdaterTarget::All => {
                    let index = global_index;
                    global_index += 1;
                    if let Ok(mut slots) = state.slots.lock() {
                        slots.global.push(None);
                    }
                    SlotKey::Global(index)
                }
                UpdaterTarget::App(app_id) => {
                    if !state.apps.contains_key(&app_id) {
                        emit(
                            state.config.logger.as_ref(),
                            LogLevel::Debug,
                            TARGET_STATUS,
                            "updater_target_unknown",
                            [json_str("app_id", app_id)],
                        );
                        continue;
                    }
                    SlotKey::Own(app_id)
                }
            };

            let weak: Weak<EngineState> = Arc::downgrade(&state);
            subscriptions.push(source.stream.subscribe(move |updater: &AppUpdater| {
                if let Some(state) = weak.upgrade() {
                    state.store(&slot, Arc::clone(updater));
                }
            }));
        }

        if let Ok(mut guard) = state.subscriptions.lock() {
            *guard = subscriptions;
        }
        if let Ok(mut slots) = state.slots.lock() {
            slots.ready = true;
        }
        state.recompute();

        Self { state }
    }

    /// Engine fed by everything registered before the registry was frozen.
    pub fn from_registry(
        registry: &RegistrySnapshot,
        capabilities: CapabilitiesSnapshot,
        config: StatusEngineConfig,
    ) -> Self {
        let mut sources = Vec::new();
        for (id, app) in &registry.apps {
            if let Some(stream) = &app.definition.updater {
                sources.push(UpdaterSource::for_app(id.clone(), stream.clone()));
            }
        }
        sources.extend(
            registry
                .global_updaters
                .iter()
                .cloned()
                .map(UpdaterSource::global),
        );

        let apps = registry
            .apps
            .values()
            .map(|app| (app.definition.clone(), app.route.clone()));
        Self::new(apps, sources, capabilities, config)
    }

    /// Current merged map; the first emission to a new subscriber is the current map.
    pub fn applications(&self) -> Observable<Arc<AppMap>> {
        self.state.applications.clone()
    }

    pub fn capabilities(&self) -> &CapabilitiesSnapshot {
        &self.state.capabilities
    }

    /// Stop listening to updaters and complete the published stream.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.state.subscriptions.lock() {
            guard.clear();
        }
        self.state.applications.complete();
    }
}

impl std::fmt::Debug for StatusMergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusMergeEngine")
            .field("apps", &self.state.apps.len())
            .field("applications", &self.state.applications)
            .finish()
    }
}

enum SlotKey {
    Own(String),
    Global(usize),
}

impl EngineState {
    fn store(&self, key: &SlotKey, updater: AppUpdater) {
        let ready = match self.slots.lock() {
            Ok(mut slots) => {
                match key {
                    SlotKey::Own(app_id) => {
                        slots.own.insert(app_id.clone(), updater);
                    }
                    SlotKey::Global(index) => {
                        if let Some(slot) = slots.global.get_mut(*index) {
                            *slot = Some(updater);
                        }
                    }
                }
                slots.version += 1;
                slots.ready
            }
            Err(_) => false,
        };
        if ready {
            self.recompute();
        }
    }

    fn recompute(&self) {
        // Updaters are user code, so they run on a copy taken outside the lock.
        let (own, global, version) = match self.slots.lock() {
            Ok(slots) => (
                slots.own.clone(),
                slots.global.iter().flatten().cloned().collect::<Vec<_>>(),
                slots.version,
            ),
            Err(_) => return,
        };

        let mut map = AppMap::with_capacity(self.apps.len());
        for (id, (definition, route)) in &self.apps {
            let updaters = own.get(id).into_iter().chain(global.iter());
            if let Some(info) = merge_app(
                definition,
                route,
                updaters,
                self.capabilities.allows(id),
            ) {
                map.insert(id.clone(), info);
            }
        }

        let fingerprint = serde_json::to_vec(&map)
            .ok()
            .map(|bytes| blake3::hash(&bytes));
        {
            let Ok(mut published) = self.published.lock() else {
                return;
            };
            if published.version > version {
                return;
            }
            if fingerprint.is_some() && published.fingerprint == fingerprint {
                return;
            }
            published.fingerprint = fingerprint;
            published.version = version;
        }

        if let Some(metrics) = &self.config.metrics {
            if let Ok(mut guard) = metrics.lock() {
                guard.record_status_recomputation();
            }
        }
        emit(
            self.config.logger.as_ref(),
            LogLevel::Debug,
            TARGET_STATUS,
            "applications_updated",
            [
                json_kv("visible_apps", map.len()),
                json_kv("version", version),
            ],
        );
        self.applications.next(Arc::new(map));
    }
}

/// Merge a definition with its updater patches.
///
/// `status` and `nav_link_status` keep the most restrictive value seen, the
/// other fields take the last explicit value. Returns `None` when the app is
/// hidden by capabilities.
pub fn merge_app<'a>(
    definition: &ApplicationDefinition,
    route: &str,
    updaters: impl IntoIterator<Item = &'a AppUpdater>,
    allowed_by_capabilities: bool,
) -> Option<PublicAppInfo> {
    let mut status = definition.status.unwrap_or_default();
    let mut nav_link_status = definition.nav_link_status.unwrap_or_default();
    let mut tooltip = definition.tooltip.clone();
    let mut default_path = definition.default_path.clone();

    for updater in updaters {
        let Some(patch) = updater(definition) else {
            continue;
        };
        if let Some(next) = patch.status {
            status = status.max(next);
        }
        if let Some(next) = patch.nav_link_status {
            nav_link_status = nav_link_status.max(next);
        }
        if patch.tooltip.is_some() {
            tooltip = patch.tooltip;
        }
        if patch.default_path.is_some() {
            default_path = patch.default_path;
        }
    }

    if !allowed_by_capabilities {
        status = AppStatus::InaccessibleDueToCapabilities;
    }
    if status == AppStatus::InaccessibleDueToCapabilities {
        return None;
    }

    Some(PublicAppInfo {
        id: definition.id.clone(),
        title: definition.title.clone(),
        description: definition.description.clone(),
        app_route: route.to_string(),
        status,
        nav_link_status: nav_link_status.resolve(status),
        tooltip,
        default_path,
        order: definition.order,
        category: definition.category.clone(),
        chromeless: definition.chromeless,
        exact_route: definition.exact_route,
        workspace_availability: definition.workspace_availability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{AppNavLinkStatus, StatusUpdate, updater};
    use crate::logging::MemorySink;
    use crate::observable::record;
    use pretty_assertions::assert_eq;

    fn app(id: &str) -> (ApplicationDefinition, String) {
        (
            ApplicationDefinition::new(id, format!("App {id}")),
            format!("/app/{id}"),
        )
    }

    fn statuses(map: &AppMap) -> Vec<(String, AppStatus, AppNavLinkStatus)> {
        map.values()
            .map(|info| (info.id.clone(), info.status, info.nav_link_status))
            .collect()
    }

    fn engine(
        apps: Vec<(ApplicationDefinition, String)>,
        sources: Vec<UpdaterSource>,
    ) -> StatusMergeEngine {
        StatusMergeEngine::new(
            apps,
            sources,
            CapabilitiesSnapshot::default(),
            StatusEngineConfig::default(),
        )
    }

    #[test]
    fn apps_without_updaters_are_accessible_and_visible() {
        let engine = engine(vec![app("app1"), app("app2")], Vec::new());
        let map = engine.applications().get();
        assert_eq!(
            statuses(&map),
            vec![
                ("app1".into(), AppStatus::Accessible, AppNavLinkStatus::Visible),
                ("app2".into(), AppStatus::Accessible, AppNavLinkStatus::Visible),
            ]
        );
        assert_eq!(map["app1"].app_route, "/app/app1");
    }

    #[test]
    fn own_updater_can_make_an_app_inaccessible() {
        let stream = Observable::new(updater(|_| {
            Some(
                StatusUpdate::new()
                    .status(AppStatus::Inaccessible)
                    .tooltip("App inaccessible due to reason")
                    .default_path("foo/bar"),
            )
        }));
        let engine = engine(
            vec![app("app1"), app("app2")],
            vec![UpdaterSource::for_app("app1", stream)],
        );
        let map = engine.applications().get();
        let app1 = &map["app1"];
        assert_eq!(app1.status, AppStatus::Inaccessible);
        assert_eq!(app1.nav_link_status, AppNavLinkStatus::Hidden);
        assert_eq!(app1.tooltip.as_deref(), Some("App inaccessible due to reason"));
        assert_eq!(app1.default_path.as_deref(), Some("foo/bar"));
        assert_eq!(map["app2"].status, AppStatus::Accessible);
    }

    #[test]
    fn most_restrictive_status_wins_in_either_order() {
        let inaccessible =
            || Observable::new(updater(|_| Some(StatusUpdate::new().status(AppStatus::Inaccessible))));
        let accessible = || {
            Observable::new(updater(|_| {
                Some(
                    StatusUpdate::new()
                        .status(AppStatus::Accessible)
                        .nav_link_status(AppNavLinkStatus::Disabled),
                )
            }))
        };

        for sources in [
            vec![
                UpdaterSource::global(inaccessible()),
                UpdaterSource::global(accessible()),
            ],
            vec![
                UpdaterSource::global(accessible()),
                UpdaterSource::global(inaccessible()),
            ],
        ] {
            let engine = engine(vec![app("app1")], sources);
            let map = engine.applications().get();
            assert_eq!(
                statuses(&map),
                vec![(
                    "app1".into(),
                    AppStatus::Inaccessible,
                    AppNavLinkStatus::Disabled
                )]
            );
        }
    }

    #[test]
    fn own_updater_applies_before_global_ones() {
        let own = Observable::new(updater(|_| {
            Some(StatusUpdate::new().tooltip("own").default_path("/own"))
        }));
        let global = Observable::new(updater(|app| {
            (app.id == "app1").then(|| {
                StatusUpdate::new()
                    .tooltip("global")
                    .nav_link_status(AppNavLinkStatus::Hidden)
            })
        }));
        let engine = engine(
            vec![app("app1"), app("app2")],
            vec![
                UpdaterSource::global(global),
                UpdaterSource::for_app("app1", own),
            ],
        );
        let map = engine.applications().get();
        assert_eq!(map["app1"].tooltip.as_deref(), Some("global"));
        assert_eq!(map["app1"].default_path.as_deref(), Some("/own"));
        assert_eq!(map["app1"].nav_link_status, AppNavLinkStatus::Hidden);
        assert_eq!(map["app2"].tooltip, None);
        assert_eq!(map["app2"].nav_link_status, AppNavLinkStatus::Visible);
    }

    #[test]
    fn emits_when_an_updater_changes() {
        let stream = Observable::new(updater(|_| None));
        let engine = engine(
            vec![app("app1")],
            vec![UpdaterSource::global(stream.clone())],
        );
        let (seen, _sub) = record(&engine.applications());

        stream.next(updater(|_| Some(StatusUpdate::new().status(AppStatus::Inaccessible))));
        // identical result, suppressed
        stream.next(updater(|_| Some(StatusUpdate::new().status(AppStatus::Inaccessible))));
        stream.next(updater(|_| None));

        let seen: Vec<AppStatus> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|map| map["app1"].status)
            .collect();
        assert_eq!(
            seen,
            vec![
                AppStatus::Accessible,
                AppStatus::Inaccessible,
                AppStatus::Accessible
            ]
        );
    }

    #[test]
    fn capabilities_remove_apps_from_the_map() {
        let mut capabilities = CapabilitiesSnapshot::default();
        capabilities.nav_links.insert("app2".into(), false);
        let engine = StatusMergeEngine::new(
            vec![app("app1"), app("app2"), app("app3")],
            Vec::new(),
            capabilities,
            StatusEngineConfig::default(),
        );
        let ids: Vec<_> = engine.applications().get().keys().cloned().collect();
        assert_eq!(ids, vec!["app1".to_string(), "app3".to_string()]);
    }

    #[test]
    fn unknown_targets_are_ignored() {
        let sink = MemorySink::new();
        let config = StatusEngineConfig {
            logger: Some(Logger::new(sink.clone())),
            metrics: None,
        };
        let stream =
            Observable::new(updater(|_| Some(StatusUpdate::new().status(AppStatus::Inaccessible))));
        let engine = StatusMergeEngine::new(
            vec![app("app1")],
            vec![UpdaterSource::for_app("missing", stream.clone())],
            CapabilitiesSnapshot::default(),
            config,
        );
        assert_eq!(engine.applications().get()["app1"].status, AppStatus::Accessible);
        assert_eq!(stream.subscriber_count(), 0);
        assert!(sink.messages().contains(&"updater_target_unknown".to_string()));
    }

    #[test]
    fn shutdown_releases_updater_subscriptions() {
        let metrics = Arc::new(Mutex::new(NavigationMetrics::new()));
        let stream = Observable::new(updater(|_| None));
        let engine = StatusMergeEngine::new(
            vec![app("app1")],
            vec![UpdaterSource::global(stream.clone())],
            CapabilitiesSnapshot::default(),
            StatusEngineConfig {
                logger: None,
                metrics: Some(Arc::clone(&metrics)),
            },
        );
        assert_eq!(stream.subscriber_count(), 1);
        engine.shutdown();
        assert_eq!(stream.subscriber_count(), 0);
        assert!(engine.applications().is_completed());
        let snapshot = metrics.lock().unwrap().snapshot(std::time::Duration::ZERO);
        assert_eq!(snapshot.status_recomputations, 1);
    }
}
