use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};

use crate::application::{
    AppLeaveAction, AppLeaveHandler, AppMap, AppMount, AppMountParams, AppStatus, OwnerToken,
    UnmountCallback, WorkspaceAvailability,
};
use crate::deps::{
    BeforeUnloadDecision, BeforeUnloadListener, ContextContainer, History, Overlays, Redirect,
    Window, WorkspaceContext,
};
use crate::error::{MountError, Result};
use crate::logging::{LogLevel, TARGET_NAVIGATION, emit, json_kv, json_str};
use crate::metrics::NavigationMetrics;
use crate::observable::Observable;
use crate::registry::RegistrySnapshot;
use crate::routing::{AppUrlParser, BasePath, append_app_path, relative_to_absolute};

use super::RuntimeConfig;
use super::audit::{RuntimeAuditEventBuilder, RuntimeAuditStage};
use super::controls::AppControls;

type LeaveHandlers = Arc<Mutex<HashMap<String, AppLeaveHandler>>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigateToAppOptions {
    /// Sub-path appended to the app route. Defaults to the app's `default_path`.
    pub path: Option<String>,
    /// Opaque payload stored with the history entry.
    pub state: Option<Value>,
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
}

impl NavigateToAppOptions {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetUrlForAppOptions {
    pub path: Option<String>,
    /// Prefix the URL with the window origin.
    pub absolute: bool,
}

impl GetUrlForAppOptions {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn absolute(mut self, absolute: bool) -> Self {
        self.absolute = absolute;
        self
    }
}

/// How a navigation request settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The target app was mounted.
    Mounted,
    /// The target was already mounted; only the history changed.
    InAppTransition,
    /// The app was mounted after a later navigation had already taken over,
    /// and was unmounted again straight away.
    Superseded,
    /// The target is unknown, has no mount function or is not accessible.
    NotFound,
    /// The target is unavailable inside the current workspace; the browser
    /// was sent to `url` instead.
    FullPageReload { url: String },
    /// The current app's leave confirmation was refused.
    Cancelled,
    /// `navigate_to_url` received a URL outside of the application routes.
    Redirected { url: String },
}

/// Lets a mounted app declare what should happen when the user leaves it.
#[derive(Clone)]
pub struct AppLeaveRegistrar {
    app_id: String,
    handlers: LeaveHandlers,
}

impl AppLeaveRegistrar {
    pub(crate) fn new(app_id: impl Into<String>, handlers: LeaveHandlers) -> Self {
        Self {
            app_id: app_id.into(),
            handlers,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Replaces any handler registered earlier by the same app.
    pub fn on_app_leave<F>(&self, handler: F)
    where
        F: Fn() -> AppLeaveAction + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.handlers.lock() {
            guard.insert(self.app_id.clone(), Arc::new(handler));
        }
    }
}

impl std::fmt::Debug for AppLeaveRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLeaveRegistrar")
            .field("app_id", &self.app_id)
            .finish()
    }
}

struct MountedApp {
    app_id: String,
    unmount: UnmountCallback,
}

/// The installed app plus the sequence number of the latest navigation.
/// A mount only installs its app if no navigation started after it.
#[derive(Default)]
struct MountSlot {
    generation: u64,
    mounted: Option<MountedApp>,
}

/// Keeps the loading counter raised for as long as it lives.
struct LoadingGuard {
    count: Observable<usize>,
}

impl LoadingGuard {
    fn raise(count: &Observable<usize>) -> Self {
        count.update(|value| value + 1);
        Self {
            count: count.clone(),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.count.update(|value| value.saturating_sub(1));
    }
}

struct MountTarget {
    mount: AppMount,
    owner: OwnerToken,
    app_base_path: String,
}

pub(crate) struct NavigationParts {
    pub registry: RegistrySnapshot,
    pub applications: Observable<Arc<AppMap>>,
    pub base_path: BasePath,
    pub history: Arc<dyn History>,
    pub redirect: Arc<dyn Redirect>,
    pub window: Arc<dyn Window>,
    pub overlays: Arc<dyn Overlays>,
    pub context: Arc<dyn ContextContainer>,
    pub url_parser: Arc<dyn AppUrlParser>,
    pub workspaces: WorkspaceContext,
    /// `(id, route)` of every app that can be mounted.
    pub mountable_routes: Vec<(String, String)>,
    pub config: RuntimeConfig,
}

/// Resolves navigation requests into history changes and app mounts.
pub(crate) struct NavigationController {
    registry: RegistrySnapshot,
    applications: Observable<Arc<AppMap>>,
    base_path: BasePath,
    history: Arc<dyn History>,
    redirect: Arc<dyn Redirect>,
    window: Arc<dyn Window>,
    overlays: Arc<dyn Overlays>,
    context: Arc<dyn ContextContainer>,
    url_parser: Arc<dyn AppUrlParser>,
    workspaces: WorkspaceContext,
    mountable_routes: Vec<(String, String)>,
    config: RuntimeConfig,
    current_app_id: Observable<Option<String>>,
    loading_count: Observable<usize>,
    controls: AppControls,
    leave_handlers: LeaveHandlers,
    slot: Mutex<MountSlot>,
}

impl NavigationController {
    pub(crate) fn new(parts: NavigationParts) -> Self {
        Self {
            registry: parts.registry,
            applications: parts.applications,
            base_path: parts.base_path,
            history: parts.history,
            redirect: parts.redirect,
            window: parts.window,
            overlays: parts.overlays,
            context: parts.context,
            url_parser: parts.url_parser,
            workspaces: parts.workspaces,
            mountable_routes: parts.mountable_routes,
            config: parts.config,
            current_app_id: Observable::new(None),
            loading_count: Observable::new(0),
            controls: AppControls::new(),
            leave_handlers: Arc::new(Mutex::new(HashMap::new())),
            slot: Mutex::new(MountSlot::default()),
        }
    }

    pub(crate) fn current_app_id(&self) -> Observable<Option<String>> {
        self.current_app_id.clone()
    }

    pub(crate) fn loading_count(&self) -> Observable<usize> {
        self.loading_count.clone()
    }

    pub(crate) fn controls(&self) -> AppControls {
        self.controls.clone()
    }

    /// Listener answering `beforeunload` for whichever app is current.
    pub(crate) fn before_unload_listener(&self) -> BeforeUnloadListener {
        let current = self.current_app_id.clone();
        let handlers = Arc::clone(&self.leave_handlers);
        Arc::new(move || {
            let Some(app_id) = current.get() else {
                return BeforeUnloadDecision::Allow;
            };
            match leave_action(&handlers, &app_id) {
                Some(AppLeaveAction::Confirm { .. }) => BeforeUnloadDecision::Prompt,
                _ => BeforeUnloadDecision::Allow,
            }
        })
    }

    pub(crate) fn get_url_for_app(
        &self,
        app_id: &str,
        options: &GetUrlForAppOptions,
    ) -> Result<String> {
        let (route, outside_workspace) = self.route_of(app_id);
        let relative = self.base_path.prepend(
            &append_app_path(&route, options.path.as_deref()),
            outside_workspace,
        );
        if options.absolute {
            relative_to_absolute(&self.window.origin(), &relative)
        } else {
            Ok(relative)
        }
    }

    pub(crate) async fn navigate_to_app(
        &self,
        app_id: &str,
        options: NavigateToAppOptions,
    ) -> Result<NavigationOutcome> {
        self.record_metric(NavigationMetrics::record_navigation);
        self.audit(RuntimeAuditStage::NavigationRequested, [("app_id", json!(app_id))]);

        let path = options.path.or_else(|| {
            self.applications
                .get()
                .get(app_id)
                .and_then(|info| info.default_path.clone())
        });

        if let Some(current) = self.current_app_id.get() {
            if current != app_id && !self.confirm_leave(&current).await {
                emit(
                    self.config.logger.as_ref(),
                    LogLevel::Info,
                    TARGET_NAVIGATION,
                    "navigation_cancelled",
                    [json_str("from", current), json_str("to", app_id)],
                );
                return Ok(NavigationOutcome::Cancelled);
            }
        }

        let (route, outside_workspace) = self.route_of(app_id);
        if outside_workspace && self.workspaces.current().is_some() {
            let url = self.base_path.prepend(&append_app_path(&route, path.as_deref()), true);
            self.window.assign(&url);
            self.record_metric(NavigationMetrics::record_full_page_reload);
            self.audit(
                RuntimeAuditStage::FullPageReload,
                [("app_id", json!(app_id)), ("url", json!(url))],
            );
            emit(
                self.config.logger.as_ref(),
                LogLevel::Info,
                TARGET_NAVIGATION,
                "full_page_reload",
                [json_str("app_id", app_id), json_str("url", url.clone())],
            );
            return Ok(NavigationOutcome::FullPageReload { url });
        }

        let target = append_app_path(&route, path.as_deref());
        if options.replace {
            self.history.replace(&target, options.state);
        } else {
            self.history.push(&target, options.state);
        }
        emit(
            self.config.logger.as_ref(),
            LogLevel::Debug,
            TARGET_NAVIGATION,
            "history_updated",
            [
                json_str("path", target),
                json_kv("replace", options.replace),
            ],
        );

        self.mount(app_id).await
    }

    pub(crate) async fn navigate_to_url(&self, url: &str) -> Result<NavigationOutcome> {
        match self.url_parser.parse(url, &self.mountable_routes) {
            Some(parsed) => {
                let options = NavigateToAppOptions {
                    path: parsed.path,
                    ..NavigateToAppOptions::default()
                };
                self.navigate_to_app(&parsed.app, options).await
            }
            None => {
                self.redirect.redirect_to(url);
                emit(
                    self.config.logger.as_ref(),
                    LogLevel::Debug,
                    TARGET_NAVIGATION,
                    "redirected",
                    [json_str("url", url)],
                );
                Ok(NavigationOutcome::Redirected {
                    url: url.to_string(),
                })
            }
        }
    }

    /// Mount the app the history currently points at, leaving history as is.
    pub(crate) async fn mount_current_location(&self) -> Result<NavigationOutcome> {
        let location = self.history.location();
        match self.url_parser.parse(&location, &self.mountable_routes) {
            Some(parsed) => self.mount(&parsed.app).await,
            None => {
                emit(
                    self.config.logger.as_ref(),
                    LogLevel::Debug,
                    TARGET_NAVIGATION,
                    "location_unmatched",
                    [json_str("location", location)],
                );
                Ok(NavigationOutcome::NotFound)
            }
        }
    }

    /// Complete every published stream.
    pub(crate) fn shutdown(&self) {
        self.current_app_id.complete();
        self.loading_count.complete();
        self.controls.complete();
    }

    async fn mount(&self, app_id: &str) -> Result<NavigationOutcome> {
        let target = self.mount_target(app_id);
        let (generation, previous) = {
            let mut slot = self.slot();
            if slot.mounted.as_ref().is_some_and(|app| app.app_id == app_id) {
                drop(slot);
                self.record_metric(NavigationMetrics::record_in_app_transition);
                self.set_current(app_id);
                return Ok(NavigationOutcome::InAppTransition);
            }
            slot.generation += 1;
            (slot.generation, slot.mounted.take())
        };
        let _loading = target
            .is_some()
            .then(|| LoadingGuard::raise(&self.loading_count));

        if let Some(previous) = previous {
            self.unmount(previous);
        }
        self.controls.clear_all();

        let Some(target) = target else {
            emit(
                self.config.logger.as_ref(),
                LogLevel::Warn,
                TARGET_NAVIGATION,
                "app_not_found",
                [json_str("app_id", app_id)],
            );
            self.set_current(app_id);
            return Ok(NavigationOutcome::NotFound);
        };

        let params = AppMountParams {
            app_id: app_id.to_string(),
            app_base_path: target.app_base_path,
            context: self.context.context_for(&target.owner),
            leave: AppLeaveRegistrar::new(app_id, Arc::clone(&self.leave_handlers)),
            controls: self.controls.clone(),
        };

        // No lock is held here: the mount may navigate again before it settles.
        let result = (target.mount)(params).await;

        match result {
            Ok(unmount) => {
                let app = MountedApp {
                    app_id: app_id.to_string(),
                    unmount,
                };
                let superseded = {
                    let mut slot = self.slot();
                    if slot.generation == generation {
                        slot.mounted = Some(app);
                        None
                    } else {
                        Some(app)
                    }
                };
                self.record_metric(|metrics| metrics.record_mount(true));
                if let Some(app) = superseded {
                    emit(
                        self.config.logger.as_ref(),
                        LogLevel::Info,
                        TARGET_NAVIGATION,
                        "app_mount_superseded",
                        [json_str("app_id", app_id)],
                    );
                    self.unmount(app);
                    return Ok(NavigationOutcome::Superseded);
                }
                self.audit(RuntimeAuditStage::AppMounted, [("app_id", json!(app_id))]);
                emit(
                    self.config.logger.as_ref(),
                    LogLevel::Info,
                    TARGET_NAVIGATION,
                    "app_mounted",
                    [json_str("app_id", app_id)],
                );
                self.set_current(app_id);
                Ok(NavigationOutcome::Mounted)
            }
            Err(err) => {
                let err = MountError::new(app_id, err.to_string());
                let latest = self.slot().generation == generation;
                self.forget_leave_handler(app_id);
                self.record_metric(|metrics| metrics.record_mount(false));
                self.audit(
                    RuntimeAuditStage::AppMountFailed,
                    [("app_id", json!(app_id)), ("reason", json!(err.reason))],
                );
                emit(
                    self.config.logger.as_ref(),
                    LogLevel::Error,
                    TARGET_NAVIGATION,
                    "app_mount_failed",
                    [
                        json_str("app_id", app_id),
                        json_str("reason", err.reason.clone()),
                    ],
                );
                if latest {
                    // The previous app is already gone; nothing is mounted.
                    self.clear_current();
                }
                Err(err.into())
            }
        }
    }

    fn unmount(&self, previous: MountedApp) {
        let MountedApp { app_id, unmount } = previous;
        unmount();
        self.forget_leave_handler(&app_id);
        self.record_metric(NavigationMetrics::record_unmount);
        self.audit(RuntimeAuditStage::AppUnmounted, [("app_id", json!(app_id))]);
        emit(
            self.config.logger.as_ref(),
            LogLevel::Debug,
            TARGET_NAVIGATION,
            "app_unmounted",
            [json_str("app_id", app_id)],
        );
    }

    fn slot(&self) -> MutexGuard<'_, MountSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mount_target(&self, app_id: &str) -> Option<MountTarget> {
        let app = self.registry.get(app_id)?;
        let mount = app.definition.mount.clone()?;
        let accessible = self
            .applications
            .get()
            .get(app_id)
            .is_some_and(|info| info.status == AppStatus::Accessible);
        if !accessible {
            return None;
        }
        let outside_workspace =
            app.definition.workspace_availability == WorkspaceAvailability::OutsideWorkspace;
        Some(MountTarget {
            mount,
            owner: app.owner.clone(),
            app_base_path: self.base_path.prepend(&app.route, outside_workspace),
        })
    }

    /// Registered route, or the conventional one for unknown ids.
    fn route_of(&self, app_id: &str) -> (String, bool) {
        match self.registry.get(app_id) {
            Some(app) => (
                app.route.clone(),
                app.definition.workspace_availability == WorkspaceAvailability::OutsideWorkspace,
            ),
            None => (
                format!(
                    "{}/{}",
                    self.config.app_route_prefix.trim_end_matches('/'),
                    app_id
                ),
                false,
            ),
        }
    }

    async fn confirm_leave(&self, current: &str) -> bool {
        match leave_action(&self.leave_handlers, current) {
            Some(AppLeaveAction::Confirm { text, title }) => {
                self.overlays.confirm(&text, title.as_deref()).await
            }
            _ => true,
        }
    }

    /// Handlers stay registered while an instance of the app is installed.
    fn forget_leave_handler(&self, app_id: &str) {
        if self
            .slot()
            .mounted
            .as_ref()
            .is_some_and(|app| app.app_id == app_id)
        {
            return;
        }
        if let Ok(mut guard) = self.leave_handlers.lock() {
            guard.remove(app_id);
        }
    }

    fn set_current(&self, app_id: &str) {
        if self.current_app_id.get().as_deref() != Some(app_id) {
            self.current_app_id.next(Some(app_id.to_string()));
        }
    }

    fn clear_current(&self) {
        if self.current_app_id.get().is_some() {
            self.current_app_id.next(None);
        }
    }

    fn record_metric<F>(&self, record: F)
    where
        F: FnOnce(&mut NavigationMetrics),
    {
        if let Some(metrics) = self.config.metrics.as_ref() {
            if let Ok(mut guard) = metrics.lock() {
                record(&mut *guard);
            }
        }
    }

    fn audit<const N: usize>(&self, stage: RuntimeAuditStage, details: [(&str, Value); N]) {
        let mut builder = RuntimeAuditEventBuilder::new(stage);
        for (key, value) in details {
            builder.detail(key, value);
        }
        self.config.audit.record(builder.finish());
    }
}

fn leave_action(handlers: &LeaveHandlers, app_id: &str) -> Option<AppLeaveAction> {
    // Handlers are user code; call them after releasing the lock.
    let handler = handlers.lock().ok()?.get(app_id).cloned()?;
    Some(handler())
}
