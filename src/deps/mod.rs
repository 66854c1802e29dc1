//! Contracts of the platform services the runtime depends on.
//!
//! Only the interfaces live here; browser-backed implementations are provided
//! by the host. [`MemoryHistory`] and [`WorkspaceContext`] are complete
//! in-process implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::application::OwnerToken;
use crate::error::CapabilitiesError;
use crate::observable::Observable;
use crate::routing::{AppUrlParser, BasePath};

/// Browser history. The state payload is passed through untouched.
pub trait History: Send + Sync {
    fn push(&self, path: &str, state: Option<Value>);
    fn replace(&self, path: &str, state: Option<Value>);
    /// Path of the current entry.
    fn location(&self) -> String;
}

/// HTTP service surface used for URL construction and loading indicators.
pub trait Http: Send + Sync {
    fn base_path(&self) -> BasePath;
    fn add_loading_count_source(&self, source: Observable<usize>);
}

/// Capabilities resolved for the registered applications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitiesSnapshot {
    pub nav_links: HashMap<String, bool>,
    pub workspaces_enabled: bool,
}

impl CapabilitiesSnapshot {
    /// Apps absent from the map are allowed.
    pub fn allows(&self, app_id: &str) -> bool {
        self.nav_links.get(app_id).copied().unwrap_or(true)
    }
}

pub trait Capabilities: Send + Sync {
    fn resolve(
        &self,
        app_ids: Vec<String>,
    ) -> BoxFuture<'static, Result<CapabilitiesSnapshot, CapabilitiesError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeUnloadDecision {
    Allow,
    Prompt,
}

pub type BeforeUnloadListener = Arc<dyn Fn() -> BeforeUnloadDecision + Send + Sync>;

/// Global window: origin, `beforeunload` listeners and full page navigation.
pub trait Window: Send + Sync {
    fn origin(&self) -> String;
    fn add_before_unload_listener(&self, listener: BeforeUnloadListener) -> ListenerId;
    fn remove_before_unload_listener(&self, id: ListenerId);
    /// Full browser navigation, equivalent to `location.assign`.
    fn assign(&self, url: &str);
}

/// Full browser navigation to URLs outside of the application routes.
pub trait Redirect: Send + Sync {
    fn redirect_to(&self, url: &str);
}

pub type ContextProvider = Arc<dyn Fn(&OwnerToken) -> Value + Send + Sync>;

pub trait ContextContainer: Send + Sync {
    fn register_context(&self, owner: &OwnerToken, context_name: &str, provider: ContextProvider);

    /// Context handed to the mount function of apps registered by `owner`.
    fn context_for(&self, _owner: &OwnerToken) -> Map<String, Value> {
        Map::new()
    }
}

pub trait Overlays: Send + Sync {
    fn confirm(&self, text: &str, title: Option<&str>) -> BoxFuture<'static, bool>;
}

/// Current workspace, `None` outside of any workspace.
#[derive(Clone, Default)]
pub struct WorkspaceContext {
    current: Observable<Option<String>>,
}

impl WorkspaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, workspace_id: Option<String>) {
        self.current.next(workspace_id);
    }

    pub fn current(&self) -> Option<String> {
        self.current.get()
    }

    pub fn current_workspace_id(&self) -> Observable<Option<String>> {
        self.current.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub path: String,
    pub state: Option<Value>,
}

/// In-memory history stack.
#[derive(Clone)]
pub struct MemoryHistory {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl MemoryHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(vec![HistoryEntry {
                path: initial.into(),
                state: None,
            }])),
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("/")
    }
}

impl History for MemoryHistory {
    fn push(&self, path: &str, state: Option<Value>) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.push(HistoryEntry {
                path: path.to_string(),
                state,
            });
        }
    }

    fn replace(&self, path: &str, state: Option<Value>) {
        if let Ok(mut guard) = self.entries.lock() {
            let entry = HistoryEntry {
                path: path.to_string(),
                state,
            };
            match guard.last_mut() {
                Some(last) => *last = entry,
                None => guard.push(entry),
            }
        }
    }

    fn location(&self) -> String {
        self.entries
            .lock()
            .ok()
            .and_then(|guard| guard.last().map(|entry| entry.path.clone()))
            .unwrap_or_else(|| "/".to_string())
    }
}

pub struct SetupDeps {
    pub http: Arc<dyn Http>,
    pub context: Arc<dyn ContextContainer>,
    pub redirect: Arc<dyn Redirect>,
    pub history: Arc<dyn History>,
    /// Falls back to a [`crate::routing::RouteTableParser`] when absent.
    pub url_parser: Option<Arc<dyn AppUrlParser>>,
}

pub struct StartDeps {
    pub capabilities: Arc<dyn Capabilities>,
    pub workspaces: WorkspaceContext,
    pub window: Arc<dyn Window>,
    pub overlays: Arc<dyn Overlays>,
}
