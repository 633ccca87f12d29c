//! Telegram transport: command parsing, dispatcher schema, keyboards and
//! admin notifications. Everything else lives in `keydropcore`.

pub mod bot;
pub mod handlers;
pub mod menu;
pub mod notifications;

pub use bot::{create_bot, setup_bot_commands};
pub use handlers::{schema, HandlerDeps};
pub use notifications::{notify_admin_startup, TelegramAuditSink};
