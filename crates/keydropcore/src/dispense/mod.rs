//! Generate requests: cooldown tracking, audit notifications and the
//! coordinator that ties entitlement checks to the line ledger.

pub mod audit;
pub mod cooldown;
pub mod coordinator;

pub use audit::{AuditEvent, AuditSink, LogAuditSink, RecordingAuditSink};
pub use cooldown::{CooldownTracker, Reservation};
pub use coordinator::{Coordinator, DispenseResult};
