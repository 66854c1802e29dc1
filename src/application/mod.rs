//! Application data model: definitions registered by plugins and the derived
//! view exposed to the rest of the platform.

mod core;

pub use self::core::{
    AppLeaveAction, AppLeaveHandler, AppMap, AppMount, AppMountParams, AppNavLinkStatus,
    AppStatus, AppUpdater, ApplicationDefinition, BoxError, OwnerToken, PublicAppInfo,
    StatusUpdate, UnmountCallback, WorkspaceAvailability, mount_fn, updater,
};
