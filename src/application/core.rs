use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::observable::Observable;
use crate::runtime::{AppControls, AppLeaveRegistrar};

/// Accessibility of an application. Declaration order is restrictiveness order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum AppStatus {
    #[default]
    Accessible,
    Inaccessible,
    InaccessibleDueToCapabilities,
}

/// Visibility of the application's navigation link. Declaration order is
/// restrictiveness order; `Default` derives the visibility from the status.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum AppNavLinkStatus {
    #[default]
    Default,
    Visible,
    Hidden,
    Disabled,
}

impl AppNavLinkStatus {
    /// Concrete visibility for a given status.
    pub fn resolve(self, status: AppStatus) -> Self {
        match self {
            Self::Default if status == AppStatus::Accessible => Self::Visible,
            Self::Default => Self::Hidden,
            other => other,
        }
    }
}

/// Where an application may be used when workspaces are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceAvailability {
    #[default]
    Anywhere,
    OutsideWorkspace,
}

/// Partial patch returned by an updater. Unset fields leave the merged value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_link_status: Option<AppNavLinkStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<String>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: AppStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn nav_link_status(mut self, nav_link_status: AppNavLinkStatus) -> Self {
        self.nav_link_status = Some(nav_link_status);
        self
    }

    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn default_path(mut self, default_path: impl Into<String>) -> Self {
        self.default_path = Some(default_path.into());
        self
    }
}

/// Function deriving a status patch from an application definition.
pub type AppUpdater = Arc<dyn Fn(&ApplicationDefinition) -> Option<StatusUpdate> + Send + Sync>;

pub fn updater<F>(f: F) -> AppUpdater
where
    F: Fn(&ApplicationDefinition) -> Option<StatusUpdate> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked once to tear an application's UI down.
pub type UnmountCallback = Box<dyn FnOnce() + Send>;

/// Asynchronous UI entry point of an application.
pub type AppMount = Arc<
    dyn Fn(AppMountParams) -> BoxFuture<'static, Result<UnmountCallback, BoxError>> + Send + Sync,
>;

pub fn mount_fn<F, Fut>(f: F) -> AppMount
where
    F: Fn(AppMountParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<UnmountCallback, BoxError>> + Send + 'static,
{
    Arc::new(move |params| f(params).boxed())
}

/// Everything an application receives when it is mounted.
#[derive(Clone)]
pub struct AppMountParams {
    pub app_id: String,
    /// Route prefixed with the server base path.
    pub app_base_path: String,
    /// Values provided through `register_mount_context` for the owning plugin.
    pub context: Map<String, Value>,
    pub leave: AppLeaveRegistrar,
    pub controls: AppControls,
}

impl AppMountParams {
    pub fn on_app_leave<F>(&self, handler: F)
    where
        F: Fn() -> AppLeaveAction + Send + Sync + 'static,
    {
        self.leave.on_app_leave(handler);
    }
}

/// What should happen when the user leaves an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppLeaveAction {
    Default,
    Confirm { text: String, title: Option<String> },
}

pub type AppLeaveHandler = Arc<dyn Fn() -> AppLeaveAction + Send + Sync>;

/// Opaque per-plugin identity used to attribute registrations.
#[derive(Clone)]
pub struct OwnerToken {
    id: Uuid,
    label: Arc<str>,
}

impl OwnerToken {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: Arc::from(label.into()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl PartialEq for OwnerToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerToken {}

impl std::hash::Hash for OwnerToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerToken({}#{})", self.label, self.id.simple())
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Application as registered by a plugin. Immutable once registered.
#[derive(Clone)]
pub struct ApplicationDefinition {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Defaults to `/app/<id>`.
    pub app_route: Option<String>,
    pub default_path: Option<String>,
    pub status: Option<AppStatus>,
    pub nav_link_status: Option<AppNavLinkStatus>,
    pub tooltip: Option<String>,
    pub order: Option<i32>,
    pub category: Option<String>,
    pub chromeless: bool,
    pub exact_route: bool,
    pub workspace_availability: WorkspaceAvailability,
    pub mount: Option<AppMount>,
    pub updater: Option<Observable<AppUpdater>>,
}

impl ApplicationDefinition {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            app_route: None,
            default_path: None,
            status: None,
            nav_link_status: None,
            tooltip: None,
            order: None,
            category: None,
            chromeless: false,
            exact_route: false,
            workspace_availability: WorkspaceAvailability::Anywhere,
            mount: None,
            updater: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.app_route = Some(route.into());
        self
    }

    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    pub fn with_status(mut self, status: AppStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_nav_link_status(mut self, nav_link_status: AppNavLinkStatus) -> Self {
        self.nav_link_status = Some(nav_link_status);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn chromeless(mut self, chromeless: bool) -> Self {
        self.chromeless = chromeless;
        self
    }

    pub fn exact_route(mut self, exact_route: bool) -> Self {
        self.exact_route = exact_route;
        self
    }

    pub fn with_workspace_availability(mut self, availability: WorkspaceAvailability) -> Self {
        self.workspace_availability = availability;
        self
    }

    pub fn with_mount(mut self, mount: AppMount) -> Self {
        self.mount = Some(mount);
        self
    }

    pub fn with_updater(mut self, updater: Observable<AppUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Route the application is served under when none was declared.
    pub fn resolved_route(&self, route_prefix: &str) -> String {
        match &self.app_route {
            Some(route) => route.clone(),
            None => format!("{}/{}", route_prefix.trim_end_matches('/'), self.id),
        }
    }
}

impl fmt::Debug for ApplicationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("app_route", &self.app_route)
            .field("default_path", &self.default_path)
            .field("workspace_availability", &self.workspace_availability)
            .field("has_mount", &self.mount.is_some())
            .field("has_updater", &self.updater.is_some())
            .finish()
    }
}

/// Read-only view of an application after status merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAppInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub app_route: String,
    pub status: AppStatus,
    pub nav_link_status: AppNavLinkStatus,
    pub tooltip: Option<String>,
    pub default_path: Option<String>,
    pub order: Option<i32>,
    pub category: Option<String>,
    pub chromeless: bool,
    pub exact_route: bool,
    pub workspace_availability: WorkspaceAvailability,
}

/// Applications keyed by id in registration order.
pub type AppMap = IndexMap<String, PublicAppInfo>;
