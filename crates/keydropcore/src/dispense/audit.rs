//! Audit notifications for dispensed batches
//!
//! Sinks are called from a detached task; their failures are logged and
//! never reach the user who triggered the dispense.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// One successful dispense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub resource_id: String,
    pub user_id: i64,
    pub count: usize,
    pub remaining: usize,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Plain-text summary used by log and chat sinks.
    pub fn summary(&self) -> String {
        format!(
            "Resource: {}\nUser: {}\nLines: {}\nRemaining: {}\nTime: {}",
            self.resource_id,
            self.user_id,
            self.count,
            self.remaining,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Writes events to the log. Used when no admin chat is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        log::info!(
            "audit: user {} took {} line(s) of {} at {} ({} left)",
            event.user_id,
            event.count,
            event.resource_id,
            event.timestamp.to_rfc3339(),
            event.remaining
        );
        Ok(())
    }
}

/// Keeps events in memory; optionally fails every call after storing.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    fail: bool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            events: Mutex::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Polls until at least `count` events arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: std::time::Duration) -> Vec<AuditEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        if self.fail {
            anyhow::bail!("audit channel unavailable");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AuditEvent {
        AuditEvent {
            resource_id: "codm".to_string(),
            user_id: 42,
            count: 100,
            remaining: 150,
            timestamp: DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap(),
        }
    }

    #[test]
    fn test_summary_lists_fields() {
        let text = event().summary();
        assert!(text.contains("Resource: codm"));
        assert!(text.contains("User: 42"));
        assert!(text.contains("Lines: 100"));
        assert!(text.contains("2025-01-01 00:00:00 UTC"));
    }

    #[tokio::test]
    async fn test_failing_sink_still_records() {
        let sink = RecordingAuditSink::failing();
        assert!(sink.record(&event()).await.is_err());
        assert_eq!(sink.events(), vec![event()]);
    }
}
