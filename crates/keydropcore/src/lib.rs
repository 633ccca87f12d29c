//! keydropcore - license keys and line rationing for the keydrop bot
//!
//! This library holds everything the bot does that is not Telegram:
//! key issuance and redemption, the per-resource line ledger, cooldowns,
//! the request coordinator and the request dispatch table.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry, clock
//! - `storage`: SQLite pool, migrations, legacy JSON import
//! - `entitlement`: key records and user bindings
//! - `ledger`: front-consumed line sequences per resource
//! - `dispense`: cooldown tracker, audit seam and the request coordinator
//! - `requests`: closed request enum and its dispatch table

pub mod core;
pub mod dispense;
pub mod entitlement;
pub mod ledger;
pub mod requests;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::{config, ErrorKind};
pub use dispense::{Coordinator, DispenseResult};
pub use entitlement::EntitlementStore;
pub use ledger::LineLedger;
pub use requests::{Reply, Request, RequestRouter};
