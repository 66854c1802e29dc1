use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use crate::logging::{LogLevel, Logger, TARGET_AUDIT, TARGET_METRICS, event_with_fields, json_kv};
use crate::metrics::NavigationMetrics;

use super::audit::{RuntimeAudit, RuntimeAuditEvent};

/// Forwards audit events to a logger, one line per lifecycle stage.
pub struct AuditLogger {
    logger: Logger,
    level: LogLevel,
    target: String,
}

impl AuditLogger {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            level: LogLevel::Debug,
            target: TARGET_AUDIT.to_string(),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }
}

impl RuntimeAudit for AuditLogger {
    fn record(&self, event: RuntimeAuditEvent) {
        let stage = format!("{:?}", event.stage);
        let fields = std::iter::once(json_kv("stage", json!(stage)))
            .chain(event.details);
        let event = event_with_fields(self.level, &self.target, "runtime_audit", fields);
        let _ = self.logger.log_event(event);
    }
}

/// Emits navigation metric snapshots through the provided logger.
pub struct MetricsReporter {
    logger: Logger,
    metrics: Arc<Mutex<NavigationMetrics>>,
    target: String,
    started_at: Instant,
}

impl MetricsReporter {
    pub fn new(logger: Logger, metrics: Arc<Mutex<NavigationMetrics>>) -> Self {
        Self {
            logger,
            metrics,
            target: TARGET_METRICS.to_string(),
            started_at: Instant::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn emit_snapshot(&self) {
        let uptime = self.started_at.elapsed();
        if let Ok(guard) = self.metrics.lock() {
            let event = guard.snapshot(uptime).to_log_event(&self.target);
            let _ = self.logger.log_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::runtime::audit::{RuntimeAuditEventBuilder, RuntimeAuditStage};

    #[test]
    fn audit_logger_flattens_details() {
        let sink = MemorySink::new();
        let audit = AuditLogger::new(Logger::new(sink.clone()));
        let mut builder = RuntimeAuditEventBuilder::new(RuntimeAuditStage::AppMounted);
        builder.detail("app_id", "app1");
        audit.record(builder.finish());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, TARGET_AUDIT);
        assert_eq!(events[0].fields["stage"], json!("AppMounted"));
        assert_eq!(events[0].fields["app_id"], json!("app1"));
    }

    #[test]
    fn metrics_reporter_logs_current_counters() {
        let sink = MemorySink::new();
        let metrics = Arc::new(Mutex::new(NavigationMetrics::new()));
        metrics.lock().unwrap().record_mount(true);
        MetricsReporter::new(Logger::new(sink.clone()), metrics).emit_snapshot();

        let events = sink.events();
        assert_eq!(events[0].message, "navigation_metrics");
        assert_eq!(events[0].target, TARGET_METRICS);
        assert_eq!(events[0].fields["mounts"], json!(1));
    }
}
