//! Entitlement store: key lifecycle and user bindings
//!
//! Keys move `created -> redeemed(owner)` exactly once and disappear on
//! revocation. Every mutation is a single SQLite transaction committed with
//! `synchronous=FULL`, so a returned `Ok` survives a crash.

pub mod key;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::config::KeyConfig;
use crate::core::error::EntitlementError;
use crate::storage::legacy::LegacySnapshot;
use crate::storage::{get_connection, DbPool};

pub use key::{generate_token, validate_token, DurationSpec, KeyRecord, RedemptionResult};

/// Attempts at finding an unused random token before giving up
const GENERATE_ATTEMPTS: usize = 8;

const KEY_COLUMNS: &str = "token, created_at, expires_at, owner, created_by";

/// Counts of a legacy import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub keys_imported: usize,
    pub keys_skipped: usize,
    pub bindings_imported: usize,
    pub bindings_skipped: usize,
}

/// Owns key records and the user -> key binding.
pub struct EntitlementStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    key_config: KeyConfig,
    allow_rebind: bool,
}

impl EntitlementStore {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            key_config: KeyConfig::default(),
            allow_rebind: true,
        }
    }

    #[must_use]
    pub fn with_key_config(mut self, key_config: KeyConfig) -> Self {
        self.key_config = key_config;
        self
    }

    /// When false, a user holding a valid key cannot redeem a different one.
    #[must_use]
    pub fn allow_rebind(mut self, allow: bool) -> Self {
        self.allow_rebind = allow;
        self
    }

    /// Creates and persists a new unredeemed key.
    ///
    /// Without `explicit_token` a random token is generated. An explicit token
    /// that already exists fails with [`EntitlementError::TokenTaken`].
    pub fn create_key(
        &self,
        duration: DurationSpec,
        creator_id: Option<i64>,
        explicit_token: Option<&str>,
    ) -> Result<KeyRecord, EntitlementError> {
        let conn = get_connection(&self.pool)?;
        let created_at = self.now();

        let mut record = KeyRecord {
            token: String::new(),
            created_at,
            expires_at: duration.expires_at(created_at),
            owner: None,
            created_by: creator_id,
        };

        if let Some(explicit) = explicit_token {
            record.token = validate_token(explicit)?;
            return match insert_key(&conn, &record) {
                Ok(()) => {
                    log::info!("Key {} created by {:?} ({})", record.token, creator_id, duration);
                    Ok(record)
                }
                Err(e) if is_unique_violation(&e) => Err(EntitlementError::TokenTaken(record.token)),
                Err(e) => Err(e.into()),
            };
        }

        for _ in 0..GENERATE_ATTEMPTS {
            record.token = generate_token(&self.key_config);
            match insert_key(&conn, &record) {
                Ok(()) => {
                    log::info!("Key {} created by {:?} ({})", record.token, creator_id, duration);
                    return Ok(record);
                }
                Err(e) if is_unique_violation(&e) => {
                    log::warn!("Generated token {} collided, drawing another", record.token);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EntitlementError::TokenTaken(record.token))
    }

    /// Binds `user_id` to the key `token`.
    ///
    /// Checks run in order: unknown token, owned by someone else, expired.
    /// Redeeming a key the user already owns is a successful no-op. The
    /// owner is claimed with a conditional update so that of two concurrent
    /// redemptions exactly one wins and the other sees
    /// [`EntitlementError::AlreadyRedeemed`].
    pub fn redeem(&self, token: &str, user_id: i64) -> Result<RedemptionResult, EntitlementError> {
        let token = token.trim();
        let now = self.now();

        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let key = load_key(&tx, token)?.ok_or_else(|| EntitlementError::KeyNotFound(token.to_string()))?;

        if let Some(owner) = key.owner {
            if owner != user_id {
                return Err(EntitlementError::AlreadyRedeemed(key.token));
            }
        }
        if let Some(expired_at) = key.expires_at.filter(|_| key.is_expired_at(now)) {
            return Err(EntitlementError::Expired {
                token: key.token,
                expired_at,
            });
        }

        let current = load_binding_token(&tx, user_id)?;
        let bound_here = current.as_deref() == Some(key.token.as_str());
        let replaced = current.filter(|bound| bound != &key.token);

        if let Some(bound) = &replaced {
            if !self.allow_rebind {
                let still_valid = load_key(&tx, bound)?
                    .is_some_and(|k| k.owner == Some(user_id) && !k.is_expired_at(now));
                if still_valid {
                    return Err(EntitlementError::AlreadyBound {
                        user_id,
                        token: bound.clone(),
                    });
                }
            }
        }

        let already_owned = key.owner == Some(user_id);
        if !already_owned {
            let claimed = tx.execute(
                "UPDATE keys SET owner = ?1, redeemed = 1 WHERE token = ?2 AND redeemed = 0",
                params![user_id, key.token],
            )?;
            if claimed == 0 {
                return Err(EntitlementError::AlreadyRedeemed(key.token));
            }
        }

        if !bound_here {
            tx.execute(
                "INSERT INTO user_keys (user_id, token) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET token = excluded.token",
                params![user_id, key.token],
            )?;
        }
        tx.commit()?;

        if let Some(previous) = &replaced {
            log::info!("User {} redeemed key {}, replacing binding to {}", user_id, key.token, previous);
        } else if !already_owned {
            log::info!("User {} redeemed key {}", user_id, key.token);
        }

        Ok(RedemptionResult {
            token: key.token,
            user_id,
            expires_at: key.expires_at,
            already_owned,
            replaced,
        })
    }

    /// Deletes a key and every binding to it. Returns whether the key existed.
    pub fn revoke(&self, token: &str) -> Result<bool, EntitlementError> {
        let token = token.trim();
        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let unbound = tx.execute("DELETE FROM user_keys WHERE token = ?1", params![token])?;
        let removed = tx.execute("DELETE FROM keys WHERE token = ?1", params![token])?;
        tx.commit()?;

        if removed > 0 {
            log::info!("Key {} revoked ({} binding(s) removed)", token, unbound);
        }
        Ok(removed > 0)
    }

    /// True when the user is bound to an existing key they own that has not expired.
    pub fn is_authorized(&self, user_id: i64) -> Result<bool, EntitlementError> {
        let now = self.now();
        Ok(self
            .get_binding(user_id)?
            .is_some_and(|key| !key.is_expired_at(now)))
    }

    /// The key the user is bound to, expired or not.
    ///
    /// A binding whose key is gone or owned by someone else is stale: it is
    /// dropped and reported as no binding.
    pub fn get_binding(&self, user_id: i64) -> Result<Option<KeyRecord>, EntitlementError> {
        let conn = get_connection(&self.pool)?;

        let Some(token) = load_binding_token(&conn, user_id)? else {
            return Ok(None);
        };

        match load_key(&conn, &token)? {
            Some(key) if key.owner == Some(user_id) => Ok(Some(key)),
            _ => {
                log::warn!("Dropping stale binding of user {} to key {}", user_id, token);
                if let Err(e) = conn.execute(
                    "DELETE FROM user_keys WHERE user_id = ?1 AND token = ?2",
                    params![user_id, token],
                ) {
                    log::warn!("Failed to drop stale binding of user {}: {}", user_id, e);
                }
                Ok(None)
            }
        }
    }

    /// Looks up a key by token.
    pub fn get_key(&self, token: &str) -> Result<Option<KeyRecord>, EntitlementError> {
        let conn = get_connection(&self.pool)?;
        Ok(load_key(&conn, token.trim())?)
    }

    /// Users whose binding points at a key they own, in ascending id order.
    pub fn bound_users(&self) -> Result<Vec<i64>, EntitlementError> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT b.user_id FROM user_keys b
             JOIN keys k ON k.token = b.token AND k.owner = b.user_id
             ORDER BY b.user_id",
        )?;
        let users = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Copies keys and bindings of a legacy JSON snapshot into the store.
    ///
    /// Existing tokens and bindings are left untouched. A binding is imported
    /// only if its key exists and is owned by that user.
    pub fn import_legacy(&self, snapshot: &LegacySnapshot) -> Result<ImportReport, EntitlementError> {
        let mut report = ImportReport::default();
        let fallback_created_at = self.now();

        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for legacy in &snapshot.keys {
            let token = match validate_token(&legacy.token) {
                Ok(token) => token,
                Err(e) => {
                    log::warn!("Skipping legacy key {:?}: {}", legacy.token, e);
                    report.keys_skipped += 1;
                    continue;
                }
            };
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO keys (token, created_at, expires_at, owner, redeemed, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    token,
                    legacy.created_at.unwrap_or_else(|| fallback_created_at.timestamp()),
                    legacy.expires_at,
                    legacy.owner,
                    legacy.owner.is_some(),
                    legacy.created_by,
                ],
            )?;
            if inserted > 0 {
                report.keys_imported += 1;
            } else {
                report.keys_skipped += 1;
            }
        }

        for (user_id, token) in &snapshot.users {
            let owned = load_key(&tx, token)?.is_some_and(|key| key.owner == Some(*user_id));
            if !owned {
                report.bindings_skipped += 1;
                continue;
            }
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO user_keys (user_id, token) VALUES (?1, ?2)",
                params![user_id, token],
            )?;
            if inserted > 0 {
                report.bindings_imported += 1;
            } else {
                report.bindings_skipped += 1;
            }
        }

        tx.commit()?;
        log::info!(
            "Legacy import: {} key(s) imported, {} skipped, {} binding(s) imported, {} skipped",
            report.keys_imported,
            report.keys_skipped,
            report.bindings_imported,
            report.bindings_skipped
        );
        Ok(report)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<KeyRecord> {
    Ok(KeyRecord {
        token: row.get(0)?,
        created_at: from_unix(row.get(1)?),
        expires_at: row.get::<_, Option<i64>>(2)?.map(from_unix),
        owner: row.get(3)?,
        created_by: row.get(4)?,
    })
}

fn load_key(conn: &Connection, token: &str) -> rusqlite::Result<Option<KeyRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM keys WHERE token = ?1", KEY_COLUMNS),
        params![token],
        key_from_row,
    )
    .optional()
}

fn load_binding_token(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT token FROM user_keys WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
}

fn insert_key(conn: &Connection, record: &KeyRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO keys (token, created_at, expires_at, owner, redeemed, created_by)
         VALUES (?1, ?2, ?3, NULL, 0, ?4)",
        params![
            record.token,
            record.created_at.timestamp(),
            record.expires_at.map(|t| t.timestamp()),
            record.created_by,
        ],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}
