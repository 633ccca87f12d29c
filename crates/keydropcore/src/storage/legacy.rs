//! Reader for the JSON key file of earlier deployments
//!
//! Layout: `{"keys": {token: {used, owner, created_by, created_at, expires_at}},
//! "users": {user_id: token}}` with timestamps as float unix seconds.
//! The reader is forgiving: missing fields take defaults, so a key record that
//! is not an object still imports as an unredeemed lifetime key. Bindings with a
//! non-numeric user or non-string token are dropped, and an unreadable file
//! yields an empty snapshot.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One key as stored in the legacy file, already normalised so that
/// `owner.is_some()` is the redeemed flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyKey {
    pub token: String,
    pub owner: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: Option<i64>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacySnapshot {
    pub keys: Vec<LegacyKey>,
    /// user id -> token
    pub users: BTreeMap<i64, String>,
}

impl LegacySnapshot {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.users.is_empty()
    }
}

/// Reads a legacy key file. Never fails: a missing, unreadable or corrupt file
/// is logged and treated as empty.
pub fn read_legacy_keys(path: impl AsRef<Path>) -> LegacySnapshot {
    let path = path.as_ref();
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("Cannot read legacy key file {}: {}", path.display(), e);
            return LegacySnapshot::default();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => parse_snapshot(&value),
        Err(e) => {
            log::error!("Legacy key file {} is corrupt, ignoring it: {}", path.display(), e);
            LegacySnapshot::default()
        }
    }
}

fn parse_snapshot(value: &Value) -> LegacySnapshot {
    let mut snapshot = LegacySnapshot::default();

    if let Some(keys) = value.get("keys").and_then(Value::as_object) {
        for (token, info) in keys {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            snapshot.keys.push(parse_key(token, info));
        }
    }

    if let Some(users) = value.get("users").and_then(Value::as_object) {
        for (user, token) in users {
            match (user.trim().parse::<i64>(), token.as_str()) {
                (Ok(user_id), Some(token)) => {
                    snapshot.users.insert(user_id, token.trim().to_string());
                }
                _ => log::warn!("Skipping malformed legacy binding {} -> {}", user, token),
            }
        }
    }

    snapshot
}

fn parse_key(token: &str, info: &Value) -> LegacyKey {
    let owner = info.get("owner").and_then(as_id);
    let used = info.get("used").and_then(Value::as_bool).unwrap_or(false);
    if used && owner.is_none() {
        log::warn!("Legacy key {} is marked used without an owner, importing as unredeemed", token);
    }

    LegacyKey {
        token: token.to_string(),
        owner,
        created_by: info.get("created_by").and_then(as_id),
        created_at: info.get("created_at").and_then(as_unix_seconds),
        expires_at: info.get("expires_at").and_then(as_unix_seconds),
    }
}

/// Ids were written as numbers, but some files carry them as strings.
fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_unix_seconds(value: &Value) -> Option<i64> {
    value.as_f64().filter(|secs| secs.is_finite()).map(|secs| secs as i64)
}
