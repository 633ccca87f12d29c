//! SQLite pool, schema migrations and legacy JSON import

pub mod db;
pub mod legacy;
pub mod migrations;

// Re-exports for convenience
pub use db::{create_pool, get_connection, open_store, DbPool};
