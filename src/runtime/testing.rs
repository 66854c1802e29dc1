//! In-process doubles for the collaborators of `ApplicationService`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::application::{ApplicationDefinition, BoxError, UnmountCallback, mount_fn};
use crate::deps::{
    BeforeUnloadListener, Capabilities, CapabilitiesSnapshot, History, Http, ListenerId,
    Overlays, Redirect, SetupDeps, StartDeps, Window, WorkspaceContext,
};
use crate::error::CapabilitiesError;
use crate::observable::Observable;
use crate::routing::{AppUrlParser, BasePath, ParsedAppUrl};

use super::InMemoryContextContainer;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HistoryCall {
    Push(String, Option<Value>),
    Replace(String, Option<Value>),
}

#[derive(Default)]
pub(crate) struct RecordingHistory {
    calls: Mutex<Vec<HistoryCall>>,
}

impl RecordingHistory {
    pub(crate) fn calls(&self) -> Vec<HistoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn pushed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HistoryCall::Push(path, _) => Some(path),
                HistoryCall::Replace(..) => None,
            })
            .collect()
    }
}

impl History for RecordingHistory {
    fn push(&self, path: &str, state: Option<Value>) {
        self.calls
            .lock()
            .unwrap()
            .push(HistoryCall::Push(path.to_string(), state));
    }

    fn replace(&self, path: &str, state: Option<Value>) {
        self.calls
            .lock()
            .unwrap()
            .push(HistoryCall::Replace(path.to_string(), state));
    }

    fn location(&self) -> String {
        match self.calls.lock().unwrap().last() {
            Some(HistoryCall::Push(path, _)) | Some(HistoryCall::Replace(path, _)) => path.clone(),
            None => "/".to_string(),
        }
    }
}

pub(crate) struct MockHttp {
    base_path: BasePath,
    sources: Mutex<Vec<Observable<usize>>>,
}

impl MockHttp {
    pub(crate) fn new(base_path: BasePath) -> Self {
        Self {
            base_path,
            sources: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn loading_sources(&self) -> Vec<Observable<usize>> {
        self.sources.lock().unwrap().clone()
    }
}

impl Http for MockHttp {
    fn base_path(&self) -> BasePath {
        self.base_path.clone()
    }

    fn add_loading_count_source(&self, source: Observable<usize>) {
        self.sources.lock().unwrap().push(source);
    }
}

#[derive(Default)]
pub(crate) struct MockWindow {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, BeforeUnloadListener)>>,
    removed: Mutex<Vec<ListenerId>>,
    assigned: Mutex<Vec<String>>,
}

impl MockWindow {
    pub(crate) fn listeners(&self) -> Vec<(ListenerId, BeforeUnloadListener)> {
        self.listeners.lock().unwrap().clone()
    }

    pub(crate) fn added(&self) -> Vec<ListenerId> {
        self.listeners().into_iter().map(|(id, _)| id).collect()
    }

    pub(crate) fn removed(&self) -> Vec<ListenerId> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn assigned(&self) -> Vec<String> {
        self.assigned.lock().unwrap().clone()
    }
}

impl Window for MockWindow {
    fn origin(&self) -> String {
        "http://localhost".to_string()
    }

    fn add_before_unload_listener(&self, listener: BeforeUnloadListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    fn remove_before_unload_listener(&self, id: ListenerId) {
        self.removed.lock().unwrap().push(id);
    }

    fn assign(&self, url: &str) {
        self.assigned.lock().unwrap().push(url.to_string());
    }
}

#[derive(Default)]
pub(crate) struct MockRedirect {
    urls: Mutex<Vec<String>>,
}

impl MockRedirect {
    pub(crate) fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Redirect for MockRedirect {
    fn redirect_to(&self, url: &str) {
        self.urls.lock().unwrap().push(url.to_string());
    }
}

pub(crate) struct MockOverlays {
    answer: Mutex<bool>,
    asked: Mutex<Vec<(String, Option<String>)>>,
}

impl MockOverlays {
    pub(crate) fn answering(answer: bool) -> Self {
        Self {
            answer: Mutex::new(answer),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_answer(&self, answer: bool) {
        *self.answer.lock().unwrap() = answer;
    }

    pub(crate) fn asked(&self) -> Vec<(String, Option<String>)> {
        self.asked.lock().unwrap().clone()
    }
}

impl Overlays for MockOverlays {
    fn confirm(&self, text: &str, title: Option<&str>) -> BoxFuture<'static, bool> {
        self.asked
            .lock()
            .unwrap()
            .push((text.to_string(), title.map(str::to_string)));
        let answer = *self.answer.lock().unwrap();
        async move { answer }.boxed()
    }
}

#[derive(Default)]
pub(crate) struct MockCapabilities {
    snapshot: Mutex<CapabilitiesSnapshot>,
    requested: Mutex<Vec<Vec<String>>>,
}

impl MockCapabilities {
    pub(crate) fn with_nav_links(nav_links: &[(&str, bool)]) -> Self {
        let snapshot = CapabilitiesSnapshot {
            nav_links: nav_links
                .iter()
                .map(|(id, allowed)| (id.to_string(), *allowed))
                .collect::<HashMap<_, _>>(),
            workspaces_enabled: false,
        };
        Self {
            snapshot: Mutex::new(snapshot),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requested(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

impl Capabilities for MockCapabilities {
    fn resolve(
        &self,
        app_ids: Vec<String>,
    ) -> BoxFuture<'static, Result<CapabilitiesSnapshot, CapabilitiesError>> {
        self.requested.lock().unwrap().push(app_ids);
        let snapshot = self.snapshot.lock().unwrap().clone();
        async move { Ok::<_, CapabilitiesError>(snapshot) }.boxed()
    }
}

/// Parser answering every URL with the same result.
pub(crate) struct FixedParser(pub Option<ParsedAppUrl>);

impl AppUrlParser for FixedParser {
    fn parse(&self, _url: &str, _routes: &[(String, String)]) -> Option<ParsedAppUrl> {
        self.0.clone()
    }
}

/// Every collaborator of a single `ApplicationService`.
pub(crate) struct Harness {
    pub http: Arc<MockHttp>,
    pub history: Arc<RecordingHistory>,
    pub redirect: Arc<MockRedirect>,
    pub context: InMemoryContextContainer,
    pub window: Arc<MockWindow>,
    pub overlays: Arc<MockOverlays>,
    pub capabilities: Arc<MockCapabilities>,
    pub workspaces: WorkspaceContext,
    pub url_parser: Option<Arc<dyn AppUrlParser>>,
}

impl Harness {
    pub(crate) fn new(base_path: BasePath) -> Self {
        Self {
            http: Arc::new(MockHttp::new(base_path)),
            history: Arc::new(RecordingHistory::default()),
            redirect: Arc::new(MockRedirect::default()),
            context: InMemoryContextContainer::new(),
            window: Arc::new(MockWindow::default()),
            overlays: Arc::new(MockOverlays::answering(true)),
            capabilities: Arc::new(MockCapabilities::default()),
            workspaces: WorkspaceContext::new(),
            url_parser: None,
        }
    }

    pub(crate) fn setup_deps(&self) -> SetupDeps {
        SetupDeps {
            http: self.http.clone(),
            context: Arc::new(self.context.clone()),
            redirect: self.redirect.clone(),
            history: self.history.clone(),
            url_parser: self.url_parser.clone(),
        }
    }

    pub(crate) fn start_deps(&self) -> StartDeps {
        StartDeps {
            capabilities: self.capabilities.clone(),
            workspaces: self.workspaces.clone(),
            window: self.window.clone(),
            overlays: self.overlays.clone(),
        }
    }
}

/// App whose mount function resolves immediately and counts unmounts.
pub(crate) fn instant_app(id: &str, unmounts: Arc<Mutex<Vec<String>>>) -> ApplicationDefinition {
    let app_id = id.to_string();
    ApplicationDefinition::new(id, format!("{id} title")).with_mount(mount_fn(move |_params| {
        let unmounts = Arc::clone(&unmounts);
        let app_id = app_id.clone();
        async move {
            let unmount: UnmountCallback = Box::new(move || unmounts.lock().unwrap().push(app_id));
            Ok::<_, BoxError>(unmount)
        }
    }))
}

/// App whose first mount only settles once the returned sender fires.
pub(crate) fn waiting_app(
    id: &str,
    unmounts: Arc<Mutex<Vec<String>>>,
) -> (ApplicationDefinition, oneshot::Sender<()>) {
    let (finish, wait) = oneshot::channel::<()>();
    let wait = Arc::new(Mutex::new(Some(wait)));
    let app_id = id.to_string();
    let app = ApplicationDefinition::new(id, format!("{id} title")).with_mount(mount_fn(
        move |_params| {
            let wait = wait.lock().unwrap().take();
            let unmounts = Arc::clone(&unmounts);
            let app_id = app_id.clone();
            async move {
                if let Some(wait) = wait {
                    let _ = wait.await;
                }
                let unmount: UnmountCallback =
                    Box::new(move || unmounts.lock().unwrap().push(app_id));
                Ok::<_, BoxError>(unmount)
            }
        },
    ));
    (app, finish)
}

/// Give spawned navigations a chance to run up to their next suspension point.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
