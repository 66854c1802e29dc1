use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::deps::{CapabilitiesSnapshot, Http, WorkspaceContext};
use crate::error::{Result, StorageError};
use crate::logging::{LogLevel, Logger, TARGET_RECENTLY_ACCESSED, emit, json_kv, json_str};
use crate::observable::{Observable, Subscription};
use crate::routing::BasePath;

/// String-keyed persistence backend, shaped like browser local storage.
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String) -> std::result::Result<(), StorageError>;
    fn remove_item(&self, key: &str);
}

/// In-process [`Storage`]. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|guard| guard.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: String) -> std::result::Result<(), StorageError> {
        let mut guard = self.entries.write().map_err(|_| StorageError::Rejected {
            key: key.to_string(),
            reason: "storage poisoned".to_string(),
        })?;
        guard.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.remove(key);
        }
    }
}

/// Records stored in a [`PersistedLog`] are de-duplicated by this id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Bounded newest-first list mirrored to a single storage entry.
///
/// Adding a record whose id is already present moves it to the front. Stored
/// data that cannot be decoded is logged, removed from storage and replaced by
/// an empty list.
pub struct PersistedLog<T> {
    key: String,
    max_length: usize,
    storage: Arc<dyn Storage>,
    items: Observable<Vec<T>>,
    writes: Mutex<()>,
    logger: Option<Logger>,
}

impl<T> PersistedLog<T>
where
    T: Identified + Serialize + DeserializeOwned + Clone + Send + 'static,
{
    pub fn new(
        key: impl Into<String>,
        max_length: usize,
        storage: Arc<dyn Storage>,
        logger: Option<Logger>,
    ) -> Self {
        let key = key.into();
        let mut items = load::<T>(storage.as_ref(), &key, logger.as_ref());
        items.truncate(max_length);
        Self {
            key,
            max_length,
            storage,
            items: Observable::new(items),
            writes: Mutex::new(()),
            logger,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Insert `item` at the front, persist, then publish the new list.
    ///
    /// Nothing is published when the storage write is rejected.
    pub fn add(&self, item: T) -> Result<()> {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.items.get();
        items.retain(|existing| existing.id() != item.id());
        items.insert(0, item);
        items.truncate(self.max_length);

        let raw = serde_json::to_string(&items).map_err(StorageError::from)?;
        self.storage.set_item(&self.key, raw)?;
        emit(
            self.logger.as_ref(),
            LogLevel::Debug,
            TARGET_RECENTLY_ACCESSED,
            "persisted_log_updated",
            [json_str("key", self.key.clone()), json_kv("len", items.len())],
        );
        self.items.next(items);
        Ok(())
    }

    pub fn get(&self) -> Vec<T> {
        self.items.get()
    }

    pub fn observe(&self) -> Observable<Vec<T>> {
        self.items.clone()
    }
}

impl<T> std::fmt::Debug for PersistedLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedLog")
            .field("key", &self.key)
            .field("max_length", &self.max_length)
            .finish()
    }
}

fn load<T: DeserializeOwned>(storage: &dyn Storage, key: &str, logger: Option<&Logger>) -> Vec<T> {
    let Some(raw) = storage.get_item(key) else {
        return Vec::new();
    };
    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(err) => {
            emit(
                logger,
                LogLevel::Warn,
                TARGET_RECENTLY_ACCESSED,
                "persisted_log_unreadable",
                [json_str("key", key), json_str("error", err.to_string())],
            );
            storage.remove_item(key);
            Vec::new()
        }
    }
}

/// One entry of the recently accessed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentlyAccessedItem {
    pub link: String,
    pub label: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl Identified for RecentlyAccessedItem {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentlyAccessedConfig {
    /// Oldest items are evicted beyond this length.
    pub max_length: usize,
    pub app_title: String,
}

impl Default for RecentlyAccessedConfig {
    fn default() -> Self {
        Self {
            max_length: 20,
            app_title: "dashboards".to_string(),
        }
    }
}

impl RecentlyAccessedConfig {
    pub fn storage_key(&self, base_path: &BasePath) -> String {
        format!("{}/{}/recentlyAccessed", base_path.get(), self.app_title)
    }
}

pub struct RecentlyAccessedDeps {
    pub http: Arc<dyn Http>,
    pub storage: Arc<dyn Storage>,
    pub workspaces: WorkspaceContext,
    pub capabilities: CapabilitiesSnapshot,
}

#[derive(Clone, Default)]
pub struct RecentlyAccessedService {
    config: RecentlyAccessedConfig,
    logger: Option<Logger>,
}

impl RecentlyAccessedService {
    pub fn new(config: RecentlyAccessedConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &RecentlyAccessedConfig {
        &self.config
    }

    pub fn start(&self, deps: RecentlyAccessedDeps) -> RecentlyAccessed {
        let key = self.config.storage_key(&deps.http.base_path());
        let log = Arc::new(PersistedLog::new(
            key,
            self.config.max_length,
            deps.storage,
            self.logger.clone(),
        ));
        let workspaces_enabled = deps.capabilities.workspaces_enabled;
        let visible = Observable::new(Vec::new());

        let from_log = {
            let workspaces = deps.workspaces.clone();
            let visible = visible.clone();
            log.observe()
                .subscribe(move |items: &Vec<RecentlyAccessedItem>| {
                    let current = workspaces.current();
                    visible.next(visible_items(items, workspaces_enabled, current.as_deref()));
                })
        };
        let from_workspace = {
            let items = log.observe();
            let visible = visible.clone();
            deps.workspaces
                .current_workspace_id()
                .subscribe(move |current: &Option<String>| {
                    let next = visible_items(&items.get(), workspaces_enabled, current.as_deref());
                    if visible.get() != next {
                        visible.next(next);
                    }
                })
        };

        emit(
            self.logger.as_ref(),
            LogLevel::Debug,
            TARGET_RECENTLY_ACCESSED,
            "recently_accessed_started",
            [
                json_str("key", log.key()),
                json_kv("items", log.get().len()),
                json_kv("workspaces_enabled", workspaces_enabled),
            ],
        );

        RecentlyAccessed {
            log,
            workspaces: deps.workspaces,
            workspaces_enabled,
            visible,
            _feeds: Arc::new(Mutex::new(vec![from_log, from_workspace])),
        }
    }
}

/// Started recently accessed store. Clones share the same list.
#[derive(Clone)]
pub struct RecentlyAccessed {
    log: Arc<PersistedLog<RecentlyAccessedItem>>,
    workspaces: WorkspaceContext,
    workspaces_enabled: bool,
    visible: Observable<Vec<RecentlyAccessedItem>>,
    _feeds: Arc<Mutex<Vec<Subscription>>>,
}

impl RecentlyAccessed {
    /// Without an explicit `workspace_id` the item joins the current workspace.
    pub fn add(
        &self,
        link: impl Into<String>,
        label: impl Into<String>,
        id: impl Into<String>,
        workspace_id: Option<&str>,
    ) -> Result<()> {
        let workspace_id = workspace_id
            .map(str::to_string)
            .or_else(|| self.workspaces.current());
        self.log.add(RecentlyAccessedItem {
            link: link.into(),
            label: label.into(),
            id: id.into(),
            workspace_id,
        })
    }

    /// Newest first, limited to the current workspace when workspaces are enabled.
    pub fn get(&self) -> Vec<RecentlyAccessedItem> {
        let current = self.workspaces.current();
        visible_items(&self.log.get(), self.workspaces_enabled, current.as_deref())
    }

    /// Same filtering as [`RecentlyAccessed::get`], updated on every change.
    pub fn observe(&self) -> Observable<Vec<RecentlyAccessedItem>> {
        self.visible.clone()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[RecentlyAccessedItem]) + Send + Sync + 'static,
    {
        self.visible
            .subscribe(move |items: &Vec<RecentlyAccessedItem>| listener(items))
    }

    pub fn storage_key(&self) -> &str {
        self.log.key()
    }
}

impl std::fmt::Debug for RecentlyAccessed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecentlyAccessed")
            .field("log", &self.log)
            .field("workspaces_enabled", &self.workspaces_enabled)
            .finish()
    }
}

fn visible_items(
    items: &[RecentlyAccessedItem],
    workspaces_enabled: bool,
    current: Option<&str>,
) -> Vec<RecentlyAccessedItem> {
    if !workspaces_enabled {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| item.workspace_id.is_some() && item.workspace_id.as_deref() == current)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplicationError;
    use crate::logging::MemorySink;
    use crate::observable::record;
    use crate::runtime::testing::MockHttp;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    struct Fixture {
        storage: MemoryStorage,
        workspaces: WorkspaceContext,
        workspaces_enabled: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: MemoryStorage::new(),
                workspaces: WorkspaceContext::new(),
                workspaces_enabled: false,
            }
        }

        fn start_with(&self, service: RecentlyAccessedService) -> RecentlyAccessed {
            service.start(RecentlyAccessedDeps {
                http: Arc::new(MockHttp::new(BasePath::new("/base-path"))),
                storage: Arc::new(self.storage.clone()),
                workspaces: self.workspaces.clone(),
                capabilities: CapabilitiesSnapshot {
                    workspaces_enabled: self.workspaces_enabled,
                    ..CapabilitiesSnapshot::default()
                },
            })
        }

        fn start(&self) -> RecentlyAccessed {
            self.start_with(RecentlyAccessedService::default())
        }
    }

    fn item(n: u32) -> RecentlyAccessedItem {
        RecentlyAccessedItem {
            link: format!("/app/item{n}"),
            label: format!("Item {n}"),
            id: format!("item{n}"),
            workspace_id: None,
        }
    }

    fn add(recent: &RecentlyAccessed, n: u32) {
        recent
            .add(format!("/app/item{n}"), format!("Item {n}"), format!("item{n}"), None)
            .unwrap();
    }

    #[test]
    fn items_are_listed_newest_first() {
        let recent = Fixture::new().start();
        add(&recent, 1);
        add(&recent, 2);
        assert_eq!(recent.get(), vec![item(2), item(1)]);
    }

    #[test]
    fn items_survive_a_restart() {
        let fixture = Fixture::new();
        let first = fixture.start();
        add(&first, 1);
        add(&first, 2);

        let second = fixture.start();
        assert_eq!(second.get(), vec![item(2), item(1)]);
    }

    #[test]
    fn re_adding_moves_the_item_to_the_front() {
        let recent = Fixture::new().start();
        add(&recent, 1);
        add(&recent, 2);
        add(&recent, 1);
        assert_eq!(recent.get(), vec![item(1), item(2)]);
    }

    #[test]
    fn oldest_items_are_evicted_beyond_capacity() {
        let fixture = Fixture::new();
        let recent = fixture.start_with(RecentlyAccessedService::new(RecentlyAccessedConfig {
            max_length: 2,
            ..RecentlyAccessedConfig::default()
        }));
        for n in 1..=3 {
            add(&recent, n);
        }
        assert_eq!(recent.get(), vec![item(3), item(2)]);
    }

    #[test]
    fn observable_replays_then_follows_additions() {
        let recent = Fixture::new().start();
        let (seen, _sub) = record(&recent.observe());
        add(&recent, 1);
        add(&recent, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![], vec![item(1)], vec![item(2), item(1)]]
        );
    }

    #[test]
    fn stored_layout_is_a_camel_case_array() {
        let fixture = Fixture::new();
        fixture.workspaces.set_current(Some("foo".to_string()));
        let recent = fixture.start();
        add(&recent, 1);

        assert_eq!(recent.storage_key(), "/base-path/dashboards/recentlyAccessed");
        let raw = fixture.storage.get_item(recent.storage_key()).unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            stored,
            json!([{ "link": "/app/item1", "label": "Item 1", "id": "item1", "workspaceId": "foo" }])
        );
    }

    #[test]
    fn items_join_the_current_workspace() {
        let fixture = Fixture::new();
        fixture.workspaces.set_current(Some("foo".to_string()));
        let recent = fixture.start();
        add(&recent, 1);
        recent
            .add("/app/item2", "Item 2", "item2", Some("bar"))
            .unwrap();

        let items = recent.get();
        assert_eq!(items[0].workspace_id.as_deref(), Some("bar"));
        assert_eq!(items[1].workspace_id.as_deref(), Some("foo"));
    }

    #[test]
    fn items_without_a_workspace_are_hidden_when_workspaces_are_enabled() {
        let mut fixture = Fixture::new();
        fixture.workspaces_enabled = true;
        let recent = fixture.start();
        add(&recent, 1);
        assert!(recent.get().is_empty());
    }

    #[test]
    fn items_of_the_current_workspace_are_shown_when_workspaces_are_enabled() {
        let mut fixture = Fixture::new();
        fixture.workspaces_enabled = true;
        fixture.workspaces.set_current(Some("foo".to_string()));
        let recent = fixture.start();
        add(&recent, 1);
        recent.add("/app/item2", "Item 2", "item2", Some("bar")).unwrap();

        assert_eq!(
            recent.get(),
            vec![RecentlyAccessedItem {
                workspace_id: Some("foo".to_string()),
                ..item(1)
            }]
        );

        let (seen, _sub) = record(&recent.observe());
        fixture.workspaces.set_current(Some("bar".to_string()));
        let last = seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].id, "item2");
    }

    #[test]
    fn unreadable_storage_is_logged_and_cleared() {
        let fixture = Fixture::new();
        fixture
            .storage
            .set_item("/base-path/dashboards/recentlyAccessed", "{not json".to_string())
            .unwrap();
        let sink = MemorySink::new();
        let recent =
            fixture.start_with(RecentlyAccessedService::default().with_logger(Logger::new(sink.clone())));

        assert!(recent.get().is_empty());
        assert!(
            sink.messages()
                .contains(&"persisted_log_unreadable".to_string())
        );
        assert_eq!(
            fixture.storage.get_item("/base-path/dashboards/recentlyAccessed"),
            None
        );
        add(&recent, 1);
        assert_eq!(recent.get(), vec![item(1)]);
    }

    struct RejectingStorage;

    impl Storage for RejectingStorage {
        fn get_item(&self, _key: &str) -> Option<String> {
            None
        }

        fn set_item(&self, key: &str, _value: String) -> std::result::Result<(), StorageError> {
            Err(StorageError::Rejected {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            })
        }

        fn remove_item(&self, _key: &str) {}
    }

    #[test]
    fn rejected_writes_leave_the_list_unchanged() {
        let log: PersistedLog<RecentlyAccessedItem> =
            PersistedLog::new("recent", 5, Arc::new(RejectingStorage), None);
        let err = log.add(item(1)).unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Storage(StorageError::Rejected { .. })
        ));
        assert!(log.get().is_empty());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RecentlyAccessedConfig = serde_json::from_str(r#"{"max_length": 5}"#).unwrap();
        assert_eq!(config.max_length, 5);
        assert_eq!(config.app_title, "dashboards");
    }
}
