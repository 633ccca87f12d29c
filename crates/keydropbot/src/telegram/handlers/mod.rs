//! Telegram bot handler tree configuration
//!
//! Every handler turns its update into a `keydropcore` request, lets the
//! router answer it and delivers the reply.

mod schema;
mod types;

pub use schema::schema;
pub use types::HandlerDeps;
