//! Prometheus counters for key redemptions and line dispensing
//!
//! Each `Metrics` owns its registry, so tests can build as many as they like
//! without fighting over global registration.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Lines handed out. Labels: resource
    pub lines_dispensed_total: IntCounterVec,
    /// Generate outcomes. Labels: outcome (ok or an error kind)
    pub generate_total: IntCounterVec,
    /// Redemption outcomes. Labels: outcome (ok or an error kind)
    pub redemptions_total: IntCounterVec,
    /// Retries of storage operations
    pub storage_retries_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("keydrop".to_string()), None)?;

        let lines_dispensed_total = IntCounterVec::new(
            Opts::new("lines_dispensed_total", "Total number of lines dispensed"),
            &["resource"],
        )?;
        let generate_total = IntCounterVec::new(
            Opts::new("generate_total", "Generate requests by outcome"),
            &["outcome"],
        )?;
        let redemptions_total = IntCounterVec::new(
            Opts::new("redemptions_total", "Key redemptions by outcome"),
            &["outcome"],
        )?;
        let storage_retries_total = IntCounter::new("storage_retries_total", "Retried storage operations")?;

        registry.register(Box::new(lines_dispensed_total.clone()))?;
        registry.register(Box::new(generate_total.clone()))?;
        registry.register(Box::new(redemptions_total.clone()))?;
        registry.register(Box::new(storage_retries_total.clone()))?;

        Ok(Self {
            registry,
            lines_dispensed_total,
            generate_total,
            redemptions_total,
            storage_retries_total,
        })
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            log::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.lines_dispensed_total.with_label_values(&["codm"]).inc_by(100);
        metrics.generate_total.with_label_values(&["ok"]).inc();

        let text = metrics.render();
        assert!(text.contains("keydrop_lines_dispensed_total{resource=\"codm\"} 100"));
        assert!(text.contains("keydrop_generate_total{outcome=\"ok\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.storage_retries_total.inc();
        assert_eq!(b.storage_retries_total.get(), 0);
    }
}
