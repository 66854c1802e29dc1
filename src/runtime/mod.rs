use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::application::{AppMap, AppUpdater, ApplicationDefinition, OwnerToken};
use crate::deps::{
    CapabilitiesSnapshot, ContextContainer, ContextProvider, History, Http, ListenerId, Redirect,
    SetupDeps, StartDeps, Window,
};
use crate::error::{LifecycleError, Result};
use crate::logging::{LogLevel, Logger, TARGET_APPLICATION, emit, json_kv, json_str};
use crate::metrics::NavigationMetrics;
use crate::observable::{Observable, Subscription};
use crate::recent::{RecentlyAccessedConfig, RecentlyAccessedService};
use crate::registry::{ApplicationRegistry, RegistrySnapshot};
use crate::routing::{AppUrlParser, BasePath, RouteTableParser};
use crate::status::{StatusEngineConfig, StatusMergeEngine};

pub mod audit;
mod context;
mod controls;
pub mod diagnostics;
mod navigation;
#[cfg(test)]
pub(crate) mod testing;

pub use audit::{
    NullRuntimeAudit, RecordingAudit, RuntimeAudit, RuntimeAuditEvent, RuntimeAuditEventBuilder,
    RuntimeAuditStage,
};
pub use context::InMemoryContextContainer;
pub use controls::{AppControls, ControlRegion, MountPoint};
pub use navigation::{
    AppLeaveRegistrar, GetUrlForAppOptions, NavigateToAppOptions, NavigationOutcome,
};

use diagnostics::MetricsReporter;
use navigation::{NavigationController, NavigationParts};

/// Configuration knobs for the application runtime.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Optional structured logger used by every component.
    pub logger: Option<Logger>,
    /// Metrics accumulator, snapshotted on `stop`.
    pub metrics: Option<Arc<Mutex<NavigationMetrics>>>,
    /// Receives lifecycle audit events.
    pub audit: Arc<dyn RuntimeAudit>,
    /// Prefix of the conventional `<prefix>/<id>` app route.
    pub app_route_prefix: String,
    pub recently_accessed: RecentlyAccessedConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            logger: None,
            metrics: None,
            audit: Arc::new(NullRuntimeAudit),
            app_route_prefix: "/app".to_string(),
            recently_accessed: RecentlyAccessedConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(NavigationMetrics::new())));
        }
    }

    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    /// Access the shared metrics handle if metrics are enabled.
    pub fn metrics_handle(&self) -> Option<Arc<Mutex<NavigationMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_audit<A>(mut self, audit: A) -> Self
    where
        A: RuntimeAudit + 'static,
    {
        self.audit = Arc::new(audit);
        self
    }

    fn log_runtime_event<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        emit(self.logger.as_ref(), level, TARGET_APPLICATION, message, fields);
    }

    fn audit_stage<I>(&self, stage: RuntimeAuditStage, details: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let mut builder = RuntimeAuditEventBuilder::new(stage);
        for (key, value) in details {
            builder.detail(key, value);
        }
        self.audit.record(builder.finish());
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("logger", &self.logger.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("app_route_prefix", &self.app_route_prefix)
            .field("recently_accessed", &self.recently_accessed)
            .finish()
    }
}

struct SetupState {
    registry: Arc<Mutex<ApplicationRegistry>>,
    http: Arc<dyn Http>,
    context: Arc<dyn ContextContainer>,
    redirect: Arc<dyn Redirect>,
    history: Arc<dyn History>,
    url_parser: Option<Arc<dyn AppUrlParser>>,
}

struct StartedState {
    engine: StatusMergeEngine,
    controller: Arc<NavigationController>,
    window: Arc<dyn Window>,
    before_unload: ListenerId,
    started_at: Instant,
}

/// Owns the application registry and, once started, the status merge engine
/// and navigation controller.
pub struct ApplicationService {
    config: RuntimeConfig,
    setup: Option<SetupState>,
    started: Option<StartedState>,
}

impl Default for ApplicationService {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl ApplicationService {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            setup: None,
            started: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RuntimeConfig {
        &mut self.config
    }

    /// Open the registration window.
    pub fn setup(&mut self, deps: SetupDeps) -> Result<ApplicationSetup> {
        if self.setup.is_some() {
            return Err(LifecycleError::AlreadySetup.into());
        }

        let base_path = deps.http.base_path();
        let registry = Arc::new(Mutex::new(ApplicationRegistry::new(
            base_path.clone(),
            self.config.app_route_prefix.clone(),
        )));
        self.setup = Some(SetupState {
            registry: Arc::clone(&registry),
            http: deps.http,
            context: Arc::clone(&deps.context),
            redirect: deps.redirect,
            history: deps.history,
            url_parser: deps.url_parser,
        });

        self.config.audit_stage(
            RuntimeAuditStage::SetupStarted,
            [json_str("base_path", base_path.get())],
        );
        self.config.log_runtime_event(
            LogLevel::Info,
            "application_setup",
            [json_str("base_path", base_path.get())],
        );

        Ok(ApplicationSetup {
            registry,
            context: deps.context,
            config: self.config.clone(),
        })
    }

    /// Close the registration window, resolve capabilities and publish the
    /// application map.
    pub async fn start(&mut self, deps: StartDeps) -> Result<ApplicationStart> {
        let Some(setup) = self.setup.as_ref() else {
            return Err(LifecycleError::StartBeforeSetup.into());
        };
        if self.started.is_some() {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        let snapshot = setup
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .freeze();
        let capabilities = deps.capabilities.resolve(snapshot.app_ids()).await?;

        let engine = StatusMergeEngine::from_registry(
            &snapshot,
            capabilities.clone(),
            StatusEngineConfig {
                logger: self.config.logger.clone(),
                metrics: self.config.metrics_handle(),
            },
        );

        let base_path = setup.http.base_path();
        let url_parser = setup.url_parser.clone().unwrap_or_else(|| {
            Arc::new(RouteTableParser::new(base_path.clone(), deps.window.origin()))
        });
        let mountable_routes = mountable_routes(&snapshot, &capabilities);

        let controller = Arc::new(NavigationController::new(NavigationParts {
            registry: snapshot.clone(),
            applications: engine.applications(),
            base_path: base_path.clone(),
            history: Arc::clone(&setup.history),
            redirect: Arc::clone(&setup.redirect),
            window: Arc::clone(&deps.window),
            overlays: deps.overlays,
            context: Arc::clone(&setup.context),
            url_parser,
            workspaces: deps.workspaces,
            mountable_routes,
            config: self.config.clone(),
        }));

        setup.http.add_loading_count_source(controller.loading_count());
        let before_unload = deps
            .window
            .add_before_unload_listener(controller.before_unload_listener());

        let visible = engine.applications().get().len();
        self.config.audit_stage(
            RuntimeAuditStage::Started,
            [
                json_kv("registered_apps", snapshot.apps.len()),
                json_kv("visible_apps", visible),
            ],
        );
        self.config.log_runtime_event(
            LogLevel::Info,
            "application_started",
            [
                json_kv("registered_apps", snapshot.apps.len()),
                json_kv("visible_apps", visible),
                json_kv("workspaces_enabled", capabilities.workspaces_enabled),
            ],
        );

        let start = ApplicationStart {
            applications: engine.applications(),
            controller: Arc::clone(&controller),
            base_path,
            capabilities,
        };
        self.started = Some(StartedState {
            engine,
            controller,
            window: deps.window,
            before_unload,
            started_at: Instant::now(),
        });
        Ok(start)
    }

    /// Release the `beforeunload` listener and complete every published stream.
    pub fn stop(&mut self) {
        let Some(started) = self.started.take() else {
            return;
        };
        started
            .window
            .remove_before_unload_listener(started.before_unload);
        started.engine.shutdown();
        started.controller.shutdown();

        let uptime_ms = started.started_at.elapsed().as_millis() as u64;
        self.config.audit_stage(
            RuntimeAuditStage::Stopped,
            [json_kv("uptime_ms", uptime_ms)],
        );
        self.config
            .log_runtime_event(LogLevel::Info, "application_stopped", [json_kv("uptime_ms", uptime_ms)]);
        if let (Some(logger), Some(metrics)) = (self.config.logger.clone(), self.config.metrics_handle())
        {
            MetricsReporter::new(logger, metrics).emit_snapshot();
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Recently accessed store configured from this runtime's settings.
    pub fn recently_accessed_service(&self) -> RecentlyAccessedService {
        let service = RecentlyAccessedService::new(self.config.recently_accessed.clone());
        match self.config.logger.clone() {
            Some(logger) => service.with_logger(logger),
            None => service,
        }
    }
}

fn mountable_routes(
    snapshot: &RegistrySnapshot,
    capabilities: &CapabilitiesSnapshot,
) -> Vec<(String, String)> {
    snapshot
        .apps
        .iter()
        .filter(|(id, app)| app.definition.mount.is_some() && capabilities.allows(id))
        .map(|(id, app)| (id.clone(), app.route.clone()))
        .collect()
}

/// Registration surface handed out by [`ApplicationService::setup`].
#[derive(Clone)]
pub struct ApplicationSetup {
    registry: Arc<Mutex<ApplicationRegistry>>,
    context: Arc<dyn ContextContainer>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for ApplicationSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self
            .registry
            .lock()
            .map(|registry| registry.len())
            .unwrap_or_default();
        f.debug_struct("ApplicationSetup")
            .field("registered", &registered)
            .field("config", &self.config)
            .finish()
    }
}

impl ApplicationSetup {
    pub fn register(&self, owner: &OwnerToken, app: ApplicationDefinition) -> Result<()> {
        let app_id = app.id.clone();
        let result = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(owner, app);

        match &result {
            Ok(()) => {
                self.config.audit_stage(
                    RuntimeAuditStage::AppRegistered,
                    [
                        json_str("app_id", app_id.clone()),
                        json_str("owner", owner.label()),
                    ],
                );
                self.config.log_runtime_event(
                    LogLevel::Debug,
                    "app_registered",
                    [json_str("app_id", app_id), json_str("owner", owner.label())],
                );
            }
            Err(err) => self.config.log_runtime_event(
                LogLevel::Warn,
                "app_registration_rejected",
                [json_str("app_id", app_id), json_str("error", err.to_string())],
            ),
        }
        result
    }

    /// Global updater applied to every application.
    pub fn register_app_updater(&self, updater: Observable<AppUpdater>) -> Result<()> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register_updater(updater)?;
        self.config
            .audit_stage(RuntimeAuditStage::UpdaterRegistered, std::iter::empty());
        Ok(())
    }

    /// Forwarded verbatim to the context container.
    pub fn register_mount_context(
        &self,
        owner: &OwnerToken,
        context_name: &str,
        provider: ContextProvider,
    ) {
        self.context.register_context(owner, context_name, provider);
        self.config.log_runtime_event(
            LogLevel::Debug,
            "mount_context_registered",
            [
                json_str("context", context_name),
                json_str("owner", owner.label()),
            ],
        );
    }
}

/// Navigation surface handed out by [`ApplicationService::start`].
#[derive(Clone)]
pub struct ApplicationStart {
    applications: Observable<Arc<AppMap>>,
    controller: Arc<NavigationController>,
    base_path: BasePath,
    capabilities: CapabilitiesSnapshot,
}

impl ApplicationStart {
    /// Visible applications, keyed by id in registration order.
    pub fn applications(&self) -> Observable<Arc<AppMap>> {
        self.applications.clone()
    }

    pub fn capabilities(&self) -> &CapabilitiesSnapshot {
        &self.capabilities
    }

    pub fn base_path(&self) -> &BasePath {
        &self.base_path
    }

    pub async fn navigate_to_app(
        &self,
        app_id: &str,
        options: NavigateToAppOptions,
    ) -> Result<NavigationOutcome> {
        self.controller.navigate_to_app(app_id, options).await
    }

    /// Navigate within the router when `url` targets an app, else leave the page.
    pub async fn navigate_to_url(&self, url: &str) -> Result<NavigationOutcome> {
        self.controller.navigate_to_url(url).await
    }

    /// Mount the app matching the current history location, as on first load
    /// or after a back/forward transition. History is left untouched.
    pub async fn mount_current_location(&self) -> Result<NavigationOutcome> {
        self.controller.mount_current_location().await
    }

    pub fn get_url_for_app(&self, app_id: &str, options: GetUrlForAppOptions) -> Result<String> {
        self.controller.get_url_for_app(app_id, &options)
    }

    /// `None` until the first navigation settles.
    pub fn current_app_id(&self) -> Observable<Option<String>> {
        self.controller.current_app_id()
    }

    /// Called with each newly settled app id.
    pub fn subscribe_current_app_id<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.controller
            .current_app_id()
            .subscribe(move |app_id: &Option<String>| {
                if let Some(app_id) = app_id {
                    listener(app_id);
                }
            })
    }

    pub fn loading_count(&self) -> Observable<usize> {
        self.controller.loading_count()
    }

    pub fn controls(&self) -> AppControls {
        self.controller.controls()
    }

    pub fn set_app_controls(&self, region: ControlRegion, mount_point: Option<MountPoint>) {
        let controls = self.controller.controls();
        match mount_point {
            Some(mount_point) => controls.set(region, mount_point),
            None => controls.clear(region),
        }
    }

    pub fn current_controls(&self, region: ControlRegion) -> Observable<Option<MountPoint>> {
        self.controller.controls().observe(region)
    }
}
