//! Application registration window and the frozen route table it produces.

mod core;

pub use self::core::{ApplicationRegistry, RegisteredApp, RegistrySnapshot};
