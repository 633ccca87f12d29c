//! Key records, duration specs and token generation

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::core::config::KeyConfig;
use crate::core::error::EntitlementError;

/// Symbols of generated tokens. Visually ambiguous characters (I, O, l, o, 0, 1)
/// are left out so keys survive being read aloud or retyped.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";

/// Longest explicit token accepted from an admin
pub const MAX_TOKEN_LENGTH: usize = 64;

/// Words that request a key without expiry
pub const LIFETIME_WORDS: &[&str] = &["life", "lifetime", "permanent"];

const MAX_DAYS: u32 = 36_500;
const MAX_HOURS: u32 = MAX_DAYS * 24;

/// Generates a random token: `config.prefix` followed by `config.token_length`
/// symbols of [`TOKEN_ALPHABET`].
pub fn generate_token(config: &KeyConfig) -> String {
    let alphabet_len = TOKEN_ALPHABET.len();
    // Largest multiple of the alphabet size that fits in a byte; anything above
    // is rejected so every symbol is equally likely
    let zone = (256 / alphabet_len) * alphabet_len;

    let mut token = String::with_capacity(config.prefix.len() + config.token_length);
    token.push_str(&config.prefix);

    let mut produced = 0;
    while produced < config.token_length {
        let byte = rand::random::<u8>() as usize;
        if byte < zone {
            token.push(TOKEN_ALPHABET[byte % alphabet_len] as char);
            produced += 1;
        }
    }
    token
}

/// Checks an admin-supplied token and returns it trimmed.
pub fn validate_token(raw: &str) -> Result<String, EntitlementError> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(EntitlementError::InvalidToken("token is empty".to_string()));
    }
    if token.chars().count() > MAX_TOKEN_LENGTH {
        return Err(EntitlementError::InvalidToken(format!(
            "token is longer than {} characters",
            MAX_TOKEN_LENGTH
        )));
    }
    if let Some(bad) = token.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
        return Err(EntitlementError::InvalidToken(format!("unexpected character {:?}", bad)));
    }
    Ok(token.to_string())
}

/// Requested validity of a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSpec {
    Lifetime,
    Days(u32),
    Hours(u32),
}

impl Default for DurationSpec {
    fn default() -> Self {
        DurationSpec::Days(1)
    }
}

impl DurationSpec {
    /// Parses `lifetime`, `<N>d` or `<N>h`, case-insensitively.
    ///
    /// Anything else falls back to one day; the fallback is logged so a typo
    /// in `/genkey 7days` does not silently become a lifetime key.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if LIFETIME_WORDS.contains(&text.as_str()) {
            return DurationSpec::Lifetime;
        }
        match Self::parse_amount(&text) {
            Some(spec) => spec,
            None => {
                log::warn!("Unrecognised key duration '{}', defaulting to 1d", text);
                DurationSpec::default()
            }
        }
    }

    /// True for strings [`DurationSpec::parse`] understands without falling back.
    pub fn is_duration(text: &str) -> bool {
        let text = text.trim().to_lowercase();
        LIFETIME_WORDS.contains(&text.as_str()) || Self::parse_amount(&text).is_some()
    }

    fn parse_amount(text: &str) -> Option<Self> {
        let unit = text.chars().last()?;
        let digits = &text[..text.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let amount: u32 = digits.parse().ok()?;
        match unit {
            'd' if (1..=MAX_DAYS).contains(&amount) => Some(DurationSpec::Days(amount)),
            'h' if (1..=MAX_HOURS).contains(&amount) => Some(DurationSpec::Hours(amount)),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            DurationSpec::Lifetime => None,
            DurationSpec::Days(days) => Some(Duration::days(i64::from(*days))),
            DurationSpec::Hours(hours) => Some(Duration::hours(i64::from(*hours))),
        }
    }

    /// Expiry of a key created at `created_at`; `None` means never.
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.as_duration().map(|d| created_at + d)
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationSpec::Lifetime => f.write_str("lifetime"),
            DurationSpec::Days(days) => write!(f, "{}d", days),
            DurationSpec::Hours(hours) => write!(f, "{}h", hours),
        }
    }
}

/// A key as persisted in the `keys` table.
///
/// `owner.is_some()` is the redeemed flag; the schema enforces the pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub owner: Option<i64>,
    pub created_by: Option<i64>,
}

impl KeyRecord {
    pub fn is_redeemed(&self) -> bool {
        self.owner.is_some()
    }

    /// A key is valid while its expiry lies strictly in the future.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Time left before expiry. `None` for lifetime keys, zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|expires| (expires - now).max(Duration::zero()))
    }
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionResult {
    pub token: String,
    pub user_id: i64,
    /// Effective expiry; `None` for lifetime keys
    pub expires_at: Option<DateTime<Utc>>,
    /// The user already owned this key; nothing changed
    pub already_owned: bool,
    /// Token of the binding this redemption replaced, if any
    pub replaced: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_token_shape() {
        let config = KeyConfig::default();
        for _ in 0..200 {
            let token = generate_token(&config);
            assert_eq!(token.len(), 8);
            assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)), "{}", token);
        }
    }

    #[test]
    fn test_generated_token_carries_prefix() {
        let config = KeyConfig {
            token_length: 8,
            prefix: "Kaze-".to_string(),
        };
        let token = generate_token(&config);
        assert!(token.starts_with("Kaze-"));
        assert_eq!(token.len(), 13);
        assert!(validate_token(&token).is_ok());
    }

    #[test]
    fn test_alphabet_has_no_ambiguous_symbols() {
        for ambiguous in [b'I', b'O', b'l', b'o', b'0', b'1'] {
            assert!(!TOKEN_ALPHABET.contains(&ambiguous));
        }
        assert_eq!(TOKEN_ALPHABET.len(), 56);
    }

    #[test]
    fn test_validate_token() {
        assert_eq!(validate_token("  ABCD1234 ").unwrap(), "ABCD1234");
        assert!(validate_token("").is_err());
        assert!(validate_token("has space").is_err());
        assert!(validate_token(&"A".repeat(MAX_TOKEN_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(DurationSpec::parse("lifetime"), DurationSpec::Lifetime);
        assert_eq!(DurationSpec::parse("LIFE"), DurationSpec::Lifetime);
        assert_eq!(DurationSpec::parse("permanent"), DurationSpec::Lifetime);
        assert_eq!(DurationSpec::parse("7d"), DurationSpec::Days(7));
        assert_eq!(DurationSpec::parse("12H"), DurationSpec::Hours(12));
    }

    #[test]
    fn test_malformed_duration_defaults_to_one_day() {
        assert_eq!(DurationSpec::parse("soon"), DurationSpec::Days(1));
        assert_eq!(DurationSpec::parse("xd"), DurationSpec::Days(1));
        assert_eq!(DurationSpec::parse("0d"), DurationSpec::Days(1));
        assert_eq!(DurationSpec::parse(""), DurationSpec::Days(1));
        assert!(!DurationSpec::is_duration("ABCDEFGh"));
        assert!(DurationSpec::is_duration("3d"));
    }

    #[test]
    fn test_expiry_boundaries() {
        let created = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let key = KeyRecord {
            token: "ABCD1234".into(),
            created_at: created,
            expires_at: DurationSpec::Hours(1).expires_at(created),
            owner: None,
            created_by: None,
        };

        assert!(!key.is_expired_at(created + Duration::minutes(59)));
        assert!(key.is_expired_at(created + Duration::hours(1)));
        assert_eq!(key.remaining_at(created + Duration::minutes(45)), Some(Duration::minutes(15)));
        assert_eq!(key.remaining_at(created + Duration::hours(2)), Some(Duration::zero()));
    }
}
