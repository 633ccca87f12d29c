use chrono::{DateTime, Utc};
use thiserror::Error;

/// Coarse classification shared by every error in the crate.
///
/// Transport code translates errors into user-facing text; this kind is what
/// survives into logs, metrics and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Expired,
    Unauthorized,
    Cooldown,
    EmptyResource,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Expired => "expired",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Cooldown => "cooldown",
            ErrorKind::EmptyResource => "empty_resource",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence failures (SQLite, pool, filesystem).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Errors of the entitlement store (key lifecycle and user bindings).
#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// An explicit token collides with an existing key
    #[error("Token {0} already exists")]
    TokenTaken(String),

    #[error("Key {0} not found")]
    KeyNotFound(String),

    /// The key is owned by another user
    #[error("Key {0} is already redeemed by another user")]
    AlreadyRedeemed(String),

    /// Rebinding is disabled and the user still holds a valid key
    #[error("User {user_id} already holds key {token}")]
    AlreadyBound { user_id: i64, token: String },

    #[error("Key {token} expired at {expired_at}")]
    Expired { token: String, expired_at: DateTime<Utc> },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EntitlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EntitlementError::InvalidToken(_) | EntitlementError::TokenTaken(_) => ErrorKind::Validation,
            EntitlementError::KeyNotFound(_) => ErrorKind::NotFound,
            EntitlementError::AlreadyRedeemed(_) | EntitlementError::AlreadyBound { .. } => ErrorKind::Conflict,
            EntitlementError::Expired { .. } => ErrorKind::Expired,
            EntitlementError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<rusqlite::Error> for EntitlementError {
    fn from(err: rusqlite::Error) -> Self {
        EntitlementError::Storage(err.into())
    }
}

impl From<r2d2::Error> for EntitlementError {
    fn from(err: r2d2::Error) -> Self {
        EntitlementError::Storage(err.into())
    }
}

/// Errors of the line ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unknown resource: {0}")]
    ResourceNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ResourceNotFound(_) => ErrorKind::NotFound,
            LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.into())
    }
}

/// Rejections of a generate request, in the order the coordinator checks them.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Cooldown active, {seconds_remaining}s remaining")]
    Cooldown { seconds_remaining: u64 },

    #[error("User has no valid key")]
    Unauthorized,

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Resource {0} has no lines left")]
    EmptyResource(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::Cooldown { .. } => ErrorKind::Cooldown,
            GenerateError::Unauthorized => ErrorKind::Unauthorized,
            GenerateError::UnknownResource(_) => ErrorKind::NotFound,
            GenerateError::EmptyResource(_) => ErrorKind::EmptyResource,
            GenerateError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<LedgerError> for GenerateError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ResourceNotFound(id) => GenerateError::UnknownResource(id),
            LedgerError::Storage(e) => GenerateError::Storage(e),
        }
    }
}

impl From<EntitlementError> for GenerateError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::Storage(e) => GenerateError::Storage(e),
            _ => GenerateError::Unauthorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_map_into_generate_errors() {
        let err: GenerateError = LedgerError::ResourceNotFound("codm".to_string()).into();
        assert!(matches!(err, GenerateError::UnknownResource(ref id) if id == "codm"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: GenerateError = LedgerError::from(io).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_entitlement_error_kinds() {
        assert_eq!(
            EntitlementError::TokenTaken("ABCD1234".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EntitlementError::AlreadyRedeemed("ABCD1234".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EntitlementError::KeyNotFound("nope".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::EmptyResource.to_string(), "empty_resource");
        assert_eq!(ErrorKind::Cooldown.as_str(), "cooldown");
    }
}
