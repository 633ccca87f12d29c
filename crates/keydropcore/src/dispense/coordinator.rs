use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::config::DispenseConfig;
use crate::core::error::GenerateError;
use crate::core::metrics::Metrics;
use crate::dispense::audit::{AuditEvent, AuditSink};
use crate::dispense::cooldown::CooldownTracker;
use crate::entitlement::EntitlementStore;
use crate::ledger::LineLedger;

/// Lines handed to a user by one generate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseResult {
    pub resource_id: String,
    pub lines: Vec<String>,
    pub remaining: usize,
}

impl DispenseResult {
    pub fn count(&self) -> usize {
        self.lines.len()
    }

    /// Attachment name, e.g. `codm_100.txt`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.txt", self.resource_id, self.count())
    }

    /// Attachment body: one line per row.
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::ledger::render_lines(&self.lines).into_bytes()
    }
}

/// Runs generate requests end to end: cooldown, entitlement, catalog,
/// dispense, then audit.
pub struct Coordinator {
    entitlements: Arc<EntitlementStore>,
    ledger: Arc<LineLedger>,
    cooldowns: CooldownTracker,
    audit: Arc<dyn AuditSink>,
    config: DispenseConfig,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl Coordinator {
    pub fn new(
        entitlements: Arc<EntitlementStore>,
        ledger: Arc<LineLedger>,
        audit: Arc<dyn AuditSink>,
        config: DispenseConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cooldowns = CooldownTracker::new(config.cooldown, clock.clone());
        Self {
            entitlements,
            ledger,
            cooldowns,
            audit,
            config,
            clock,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn entitlements(&self) -> &EntitlementStore {
        &self.entitlements
    }

    pub fn ledger(&self) -> &LineLedger {
        &self.ledger
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn config(&self) -> &DispenseConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }

    /// Hands `batch_size` lines of `resource_id` to `user_id`.
    ///
    /// Checks short-circuit in this order: cooldown, authorization, known
    /// resource, non-empty result. An empty resource still consumes the
    /// cooldown window; the other rejections do not.
    pub async fn generate(&self, user_id: i64, resource_id: &str) -> Result<DispenseResult, GenerateError> {
        let resource_id = resource_id.trim().to_lowercase();

        let outcome = match self.cooldowns.try_reserve(user_id).await {
            Err(seconds_remaining) => Err(GenerateError::Cooldown { seconds_remaining }),
            Ok(reservation) => {
                let outcome = self.dispense_for(user_id, &resource_id).await;
                match &outcome {
                    Ok(_) | Err(GenerateError::EmptyResource(_)) => self.cooldowns.confirm(reservation).await,
                    Err(_) => self.cooldowns.cancel(reservation).await,
                }
                outcome
            }
        };

        match &outcome {
            Ok(result) => {
                log::info!(
                    "User {} received {} line(s) of {}, {} left",
                    user_id,
                    result.count(),
                    result.resource_id,
                    result.remaining
                );
                self.emit_audit(user_id, result);
            }
            Err(e) => log::warn!("Generate {} for user {} rejected [{}]: {}", resource_id, user_id, e.kind(), e),
        }
        self.observe(&resource_id, &outcome);

        outcome
    }

    async fn dispense_for(&self, user_id: i64, resource_id: &str) -> Result<DispenseResult, GenerateError> {
        if !self.entitlements.is_authorized(user_id)? {
            return Err(GenerateError::Unauthorized);
        }
        if !self.ledger.contains(resource_id) {
            return Err(GenerateError::UnknownResource(resource_id.to_string()));
        }

        let (lines, remaining) = self.ledger.dispense(resource_id, self.config.batch_size).await?;
        if lines.is_empty() {
            return Err(GenerateError::EmptyResource(resource_id.to_string()));
        }

        Ok(DispenseResult {
            resource_id: resource_id.to_string(),
            lines,
            remaining,
        })
    }

    fn emit_audit(&self, user_id: i64, result: &DispenseResult) {
        let event = AuditEvent {
            resource_id: result.resource_id.clone(),
            user_id,
            count: result.count(),
            remaining: result.remaining,
            timestamp: self.clock.now(),
        };
        let sink = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(e) = sink.record(&event).await {
                log::warn!(
                    "Audit delivery failed for {} line(s) of {} to user {}: {}",
                    event.count,
                    event.resource_id,
                    event.user_id,
                    e
                );
            }
        });
    }

    fn observe(&self, resource_id: &str, outcome: &Result<DispenseResult, GenerateError>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match outcome {
            Ok(result) => {
                metrics.generate_total.with_label_values(&["ok"]).inc();
                metrics
                    .lines_dispensed_total
                    .with_label_values(&[resource_id])
                    .inc_by(result.count() as u64);
            }
            Err(e) => metrics.generate_total.with_label_values(&[e.kind().as_str()]).inc(),
        }
    }
}
