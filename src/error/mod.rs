//! Error taxonomy for the application runtime.

mod types;

pub use types::{
    ApplicationError, CapabilitiesError, ConfigurationError, LifecycleError, MountError, Result,
    StorageError,
};
