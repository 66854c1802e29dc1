//! Client-side application lifecycle and navigation runtime.
//!
//! Plugins register applications during setup. On start the registry is
//! frozen, status updaters are merged into a published application map, and
//! the navigation controller mounts one application at a time in response to
//! history changes. A small persisted store tracks recently accessed items.
//!
//! Modules keep the `mod.rs` + `core.rs` split: orchestrators re-export the
//! public surface, the implementation stays private.

pub mod application;
pub mod deps;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod observable;
pub mod recent;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod status;

pub use application::{
    AppLeaveAction, AppMap, AppMount, AppMountParams, AppNavLinkStatus, AppStatus, AppUpdater,
    ApplicationDefinition, OwnerToken, PublicAppInfo, StatusUpdate, UnmountCallback,
    WorkspaceAvailability, mount_fn, updater,
};
pub use deps::{
    BeforeUnloadDecision, Capabilities, CapabilitiesSnapshot, ContextContainer, History, Http,
    MemoryHistory, Overlays, Redirect, SetupDeps, StartDeps, Window, WorkspaceContext,
};
pub use error::{
    ApplicationError, CapabilitiesError, ConfigurationError, LifecycleError, MountError, Result,
    StorageError,
};
pub use logging::{LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult};
pub use metrics::{MetricSnapshot, NavigationMetrics};
pub use observable::{Observable, Subscription};
pub use recent::{
    MemoryStorage, PersistedLog, RecentlyAccessed, RecentlyAccessedConfig, RecentlyAccessedItem,
    RecentlyAccessedService, Storage,
};
pub use registry::{ApplicationRegistry, RegistrySnapshot};
pub use routing::{BasePath, append_app_path};
pub use runtime::audit::{
    NullRuntimeAudit, RecordingAudit, RuntimeAudit, RuntimeAuditEvent, RuntimeAuditEventBuilder,
    RuntimeAuditStage,
};
pub use runtime::diagnostics::{AuditLogger, MetricsReporter};
pub use runtime::{
    AppControls, ApplicationService, ApplicationSetup, ApplicationStart, ControlRegion,
    GetUrlForAppOptions, MountPoint, NavigateToAppOptions, NavigationOutcome, RuntimeConfig,
};
pub use status::StatusMergeEngine;
