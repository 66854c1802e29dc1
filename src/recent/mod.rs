//! Recently accessed items, persisted through a string-keyed storage backend.

mod core;

pub use self::core::{
    Identified, MemoryStorage, PersistedLog, RecentlyAccessed, RecentlyAccessedConfig,
    RecentlyAccessedDeps, RecentlyAccessedItem, RecentlyAccessedService, Storage,
};
