use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: keydrop.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "keydrop.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: keydrop.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "keydrop.log".to_string()));

/// Legacy JSON key file imported once at startup, if set
pub static LEGACY_KEYS_FILE: Lazy<Option<String>> = Lazy::new(|| {
    env::var("LEGACY_KEYS_FILE")
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
});

/// Resource catalog configuration
pub mod resources {
    use super::*;

    /// Categories shipped with the reference deployment.
    pub const DEFAULT_CATALOG: &[(&str, &str)] = &[
        ("valorant", "Valorant.txt"),
        ("roblox", "Roblox.txt"),
        ("codm", "CODM.txt"),
        ("crossfire", "Crossfire.txt"),
        ("facebook", "Facebook.txt"),
        ("gmail", "Gmail.txt"),
        ("mtacc", "Mtacc.txt"),
        ("gaslite", "gaslite.txt"),
        ("bloodstrike", "Bloodstrike.txt"),
        ("random", "Random.txt"),
        ("100082", "100082.txt"),
    ];

    /// Folder holding the resource text files
    /// Read from RESOURCES_DIR environment variable
    /// Default: files
    pub static RESOURCES_DIR: Lazy<PathBuf> =
        Lazy::new(|| PathBuf::from(env::var("RESOURCES_DIR").unwrap_or_else(|_| "files".to_string())));

    /// Resource catalog as (id, file name) pairs
    /// Read from RESOURCES environment variable, e.g. `codm=CODM.txt,gmail=Gmail.txt`
    pub static CATALOG: Lazy<Vec<(String, String)>> = Lazy::new(|| match env::var("RESOURCES") {
        Ok(raw) if !raw.trim().is_empty() => parse_catalog(&raw),
        _ => DEFAULT_CATALOG
            .iter()
            .map(|(id, file)| (id.to_string(), file.to_string()))
            .collect(),
    });

    /// Parses `id=file` pairs. Ids are lowercased; malformed entries are skipped,
    /// as are repeated ids and files already claimed by an earlier id.
    pub fn parse_catalog(raw: &str) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((id, file)) if !id.trim().is_empty() && !file.trim().is_empty() => {
                    let id = id.trim().to_lowercase();
                    let file = file.trim();
                    if entries.iter().any(|(existing, _)| *existing == id) {
                        log::warn!("Duplicate resource id '{}' in RESOURCES, keeping the first", id);
                        continue;
                    }
                    if entries.iter().any(|(_, existing)| existing.eq_ignore_ascii_case(file)) {
                        log::warn!("Resource '{}' reuses file {} in RESOURCES, skipping it", id, file);
                        continue;
                    }
                    entries.push((id, file.to_string()));
                }
                _ => log::warn!("Ignoring malformed RESOURCES entry: {}", part),
            }
        }
        entries
    }
}

/// Dispense configuration
pub mod dispense {
    use super::*;

    /// Lines handed out per generate request
    pub static BATCH_SIZE: Lazy<usize> = Lazy::new(|| {
        env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(100)
    });

    /// Seconds between two generate requests of the same user
    pub static COOLDOWN_SECONDS: Lazy<u64> = Lazy::new(|| {
        env::var("COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(30)
    });

    /// Whether redeeming a second key replaces the user's existing binding.
    /// Applied through `EntitlementStore::allow_rebind`.
    pub static ALLOW_REBIND: Lazy<bool> = Lazy::new(|| {
        env::var("ALLOW_REBIND")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(true)
    });

    /// Cooldown duration
    pub fn cooldown() -> Duration {
        Duration::from_secs(*COOLDOWN_SECONDS)
    }
}

/// Key generation configuration
pub mod keys {
    use super::*;

    /// Generated token length, not counting the prefix
    pub const TOKEN_LENGTH: usize = 8;

    /// Prefix prepended to generated tokens
    /// Read from KEY_PREFIX environment variable
    pub static KEY_PREFIX: Lazy<String> = Lazy::new(|| env::var("KEY_PREFIX").unwrap_or_default());
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Bot API requests (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 120;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    pub fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Admin user IDs (comma-separated)
    /// Read from ADMIN_IDS environment variable
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });

    /// Admin user ID for audit notifications
    /// Read from ADMIN_USER_ID or fallback to first ADMIN_IDS entry
    /// Defaults to 0 if not set (no admin notifications)
    pub static ADMIN_USER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("ADMIN_USER_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| ADMIN_IDS.first().copied())
            .unwrap_or(0)
    });
}

/// Knobs of the request coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseConfig {
    /// `FIXED_BATCH_SIZE`: lines per successful generate
    pub batch_size: usize,
    /// Minimum interval between two accepted generate requests of one user
    pub cooldown: Duration,
}

impl DispenseConfig {
    pub fn new(batch_size: usize, cooldown: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cooldown,
        }
    }

    pub fn from_env() -> Self {
        Self::new(*dispense::BATCH_SIZE, dispense::cooldown())
    }
}

impl Default for DispenseConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(30))
    }
}

/// Shape of generated tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    pub token_length: usize,
    pub prefix: String,
}

impl KeyConfig {
    pub fn from_env() -> Self {
        Self {
            token_length: keys::TOKEN_LENGTH,
            prefix: keys::KEY_PREFIX.clone(),
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            token_length: keys::TOKEN_LENGTH,
            prefix: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_skips_malformed_entries() {
        let parsed = resources::parse_catalog(" CODM=CODM.txt, broken, =x.txt, gmail = Gmail.txt ,codm=Other.txt");
        assert_eq!(
            parsed,
            vec![
                ("codm".to_string(), "CODM.txt".to_string()),
                ("gmail".to_string(), "Gmail.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_catalog_skips_shared_files() {
        let parsed = resources::parse_catalog("codm=CODM.txt,cod=codm.txt,gmail=Gmail.txt");
        assert_eq!(
            parsed,
            vec![
                ("codm".to_string(), "CODM.txt".to_string()),
                ("gmail".to_string(), "Gmail.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_admin_ids() {
        assert_eq!(admin::parse_admin_ids("1, 2\n3\tx"), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = DispenseConfig::new(0, Duration::from_secs(5));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.cooldown, Duration::from_secs(5));
    }
}
