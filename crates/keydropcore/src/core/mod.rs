//! Core utilities, configuration, and common functionality

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EntitlementError, ErrorKind, GenerateError, LedgerError, StorageError};
pub use logging::init_logger;
pub use metrics::Metrics;
