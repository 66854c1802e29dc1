//! Lifecycle audit hooks for `ApplicationService`.
//!
//! Records capture a stage identifier plus structured metadata so callers can
//! log, buffer, or inspect how applications were registered, navigated to and
//! mounted without reaching into the navigation controller.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;

/// Distinct lifecycle checkpoints emitted by `ApplicationService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeAuditStage {
    /// `setup` opened the registration window.
    SetupStarted,
    /// An application was added to the registry.
    AppRegistered,
    /// A global updater stream was registered.
    UpdaterRegistered,
    /// `start` resolved capabilities and published the application map.
    Started,
    /// `navigate_to_app` was called.
    NavigationRequested,
    /// Navigation left the client-side router for a full page load.
    FullPageReload,
    AppMounted,
    AppMountFailed,
    AppUnmounted,
    /// `stop` released global listeners.
    Stopped,
}

/// Structured audit entry.
#[derive(Debug, Clone)]
pub struct RuntimeAuditEvent {
    pub timestamp: SystemTime,
    pub stage: RuntimeAuditStage,
    pub details: Vec<(String, Value)>,
}

impl RuntimeAuditEvent {
    fn new(stage: RuntimeAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            details: Vec::new(),
        }
    }

    pub fn detail_value(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }
}

/// Builder helper to append fields ergonomically.
pub struct RuntimeAuditEventBuilder {
    event: RuntimeAuditEvent,
}

impl RuntimeAuditEventBuilder {
    pub fn new(stage: RuntimeAuditStage) -> Self {
        Self {
            event: RuntimeAuditEvent::new(stage),
        }
    }

    pub fn detail(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.event.details.push((key.into(), value.into()));
        self
    }

    pub fn finish(self) -> RuntimeAuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait RuntimeAudit: Send + Sync {
    fn record(&self, event: RuntimeAuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullRuntimeAudit;

impl RuntimeAudit for NullRuntimeAudit {
    fn record(&self, _event: RuntimeAuditEvent) {}
}

/// Buffers every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudit {
    events: Arc<Mutex<Vec<RuntimeAuditEvent>>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RuntimeAuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<RuntimeAuditStage> {
        self.events().into_iter().map(|event| event.stage).collect()
    }
}

impl RuntimeAudit for RecordingAudit {
    fn record(&self, event: RuntimeAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
