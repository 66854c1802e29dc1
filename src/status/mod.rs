//! Fan-in of application updaters into the published application map.

mod core;

pub use self::core::{StatusEngineConfig, StatusMergeEngine, UpdaterSource, UpdaterTarget, merge_app};
