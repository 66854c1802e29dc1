use crate::logging::{LogEvent, LogFields, LogLevel};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct NavigationMetrics {
    navigations: u64,
    in_app_transitions: u64,
    full_page_reloads: u64,
    mounts: u64,
    mount_failures: u64,
    unmounts: u64,
    status_recomputations: u64,
}

impl NavigationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_in_app_transition(&mut self) {
        self.in_app_transitions = self.in_app_transitions.saturating_add(1);
    }

    pub fn record_full_page_reload(&mut self) {
        self.full_page_reloads = self.full_page_reloads.saturating_add(1);
    }

    pub fn record_mount(&mut self, succeeded: bool) {
        if succeeded {
            self.mounts = self.mounts.saturating_add(1);
        } else {
            self.mount_failures = self.mount_failures.saturating_add(1);
        }
    }

    pub fn record_unmount(&mut self) {
        self.unmounts = self.unmounts.saturating_add(1);
    }

    pub fn record_status_recomputation(&mut self) {
        self.status_recomputations = self.status_recomputations.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            navigations: self.navigations,
            in_app_transitions: self.in_app_transitions,
            full_page_reloads: self.full_page_reloads,
            mounts: self.mounts,
            mount_failures: self.mount_failures,
            unmounts: self.unmounts,
            status_recomputations: self.status_recomputations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub navigations: u64,
    pub in_app_transitions: u64,
    pub full_page_reloads: u64,
    pub mounts: u64,
    pub mount_failures: u64,
    pub unmounts: u64,
    pub status_recomputations: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "navigation_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        let mut map = LogFields::new();
        map.insert("uptime_ms".to_string(), json!(self.uptime_ms));
        map.insert("navigations".to_string(), json!(self.navigations));
        map.insert("in_app_transitions".to_string(), json!(self.in_app_transitions));
        map.insert("full_page_reloads".to_string(), json!(self.full_page_reloads));
        map.insert("mounts".to_string(), json!(self.mounts));
        map.insert("mount_failures".to_string(), json!(self.mount_failures));
        map.insert("unmounts".to_string(), json!(self.unmounts));
        map.insert(
            "status_recomputations".to_string(),
            json!(self.status_recomputations),
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_outcomes_are_split() {
        let mut metrics = NavigationMetrics::new();
        metrics.record_mount(true);
        metrics.record_mount(false);
        metrics.record_mount(true);
        let snapshot = metrics.snapshot(Duration::from_millis(1500));
        assert_eq!(snapshot.mounts, 2);
        assert_eq!(snapshot.mount_failures, 1);
        assert_eq!(snapshot.uptime_ms, 1500);
    }

    #[test]
    fn snapshot_serializes_every_counter() {
        let mut metrics = NavigationMetrics::new();
        metrics.record_navigation();
        metrics.record_full_page_reload();
        let event = metrics.snapshot(Duration::ZERO).to_log_event("appshell::metrics");
        assert_eq!(event.message, "navigation_metrics");
        assert_eq!(event.fields["navigations"], json!(1));
        assert_eq!(event.fields["full_page_reloads"], json!(1));
        assert_eq!(event.fields.len(), 8);
    }
}
