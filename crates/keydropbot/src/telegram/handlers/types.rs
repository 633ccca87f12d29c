//! Shared types for Telegram handlers

use std::sync::Arc;

use keydropcore::RequestRouter;
use teloxide::types::User;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies shared by every handler
#[derive(Clone)]
pub struct HandlerDeps {
    pub router: Arc<RequestRouter>,
}

impl HandlerDeps {
    pub fn new(router: Arc<RequestRouter>) -> Self {
        Self { router }
    }
}

/// Telegram user id as stored in the key database.
pub fn sender_id(user: Option<&User>) -> Option<i64> {
    user.and_then(|u| i64::try_from(u.id.0).ok())
}
