use thiserror::Error;

/// Unified result type for the application runtime.
pub type Result<T> = std::result::Result<T, ApplicationError>;

/// Invalid application definitions, rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("An application is already registered with the id \"{0}\"")]
    DuplicateId(String),
    #[error("An application is already registered with the appRoute \"{0}\"")]
    DuplicateRoute(String),
    #[error("Cannot register an application route that includes HTTP base path")]
    RouteUnderBasePath,
}

/// Misuse of the setup/start/stop sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Applications cannot be registered after \"setup\"")]
    RegisterAfterSetup,
    #[error("App updaters cannot be registered after \"setup\"")]
    UpdaterAfterSetup,
    #[error("ApplicationService#setup() must be invoked before start.")]
    StartBeforeSetup,
    #[error("ApplicationService#setup() was already invoked")]
    AlreadySetup,
    #[error("ApplicationService#start() was already invoked")]
    AlreadyStarted,
}

/// Failure reported by an application's mount function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("application `{app_id}` failed to mount: {reason}")]
pub struct MountError {
    pub app_id: String,
    pub reason: String,
}

impl MountError {
    pub fn new(app_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            reason: reason.into(),
        }
    }
}

/// Persistence failures of the key-value storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage write rejected for `{key}`: {reason}")]
    Rejected { key: String, reason: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Capability resolution failed during start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("capabilities unavailable: {0}")]
pub struct CapabilitiesError(pub String);

/// Errors surfaced by the application runtime.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Capabilities(#[from] CapabilitiesError),
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}
