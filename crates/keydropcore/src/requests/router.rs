use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::core::error::{EntitlementError, GenerateError, LedgerError};
use crate::core::retry::{retry, RetryConfig};
use crate::dispense::Coordinator;
use crate::entitlement::{DurationSpec, KeyRecord};
use crate::ledger::Catalog;
use crate::requests::{MenuOption, Reply, Request};

const TRY_AGAIN: &str = "Something went wrong, please try again later.";

/// The single dispatch table from [`Request`] to [`Reply`].
pub struct RequestRouter {
    coordinator: Arc<Coordinator>,
    catalog: Catalog,
    admins: Vec<i64>,
    retry_config: RetryConfig,
}

impl RequestRouter {
    pub fn new(coordinator: Arc<Coordinator>, catalog: Catalog, admins: Vec<i64>) -> Self {
        Self {
            coordinator,
            catalog,
            admins,
            retry_config: RetryConfig::storage(),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn handle(&self, user_id: i64, request: Request) -> Reply {
        log::debug!("User {} -> {}", user_id, request.name());

        if request.is_admin_only() && !self.is_admin(user_id) {
            log::warn!("User {} tried admin command {}", user_id, request.name());
            return Reply::text("This command is for admins only.");
        }

        match request {
            Request::Start => self.start(user_id),
            Request::Help => self.help(user_id),
            Request::Redeem { token } => self.redeem(user_id, &token),
            Request::MyKey => self.my_key(user_id),
            Request::MyTime => self.my_time(user_id),
            Request::GenerateKey { token, duration } => self.generate_key(user_id, token.as_deref(), duration),
            Request::Revoke { token } => self.revoke(&token),
            Request::Broadcast { text } => self.broadcast(&text),
            Request::Stock => self.stock().await,
            Request::Stats => self.stats(),
            Request::Generate { resource } => self.generate(user_id, &resource).await,
            Request::Restock { resource, content } => self.restock(&resource, &content).await,
        }
    }

    fn start(&self, user_id: i64) -> Reply {
        match self.coordinator.entitlements().is_authorized(user_id) {
            Ok(true) => Reply::Menu {
                text: "Choose a resource:".to_string(),
                options: self.menu_options(),
            },
            Ok(false) => Reply::text(
                "Welcome!\n\nYou need a valid key before you can use the generator.\n\
                 Redeem one with /key <KEY>.",
            ),
            Err(e) => {
                log::error!("Authorization lookup for {} failed: {}", user_id, e);
                Reply::text(TRY_AGAIN)
            }
        }
    }

    fn menu_options(&self) -> Vec<MenuOption> {
        self.catalog
            .entries()
            .iter()
            .filter(|entry| self.coordinator.ledger().contains(&entry.id))
            .map(|entry| MenuOption {
                label: entry.label().to_string(),
                data: entry.id.clone(),
            })
            .collect()
    }

    fn help(&self, user_id: i64) -> Reply {
        let mut text = String::from(
            "/start - open the menu\n\
             /key <KEY> - redeem a key\n\
             /mykey - show your key\n\
             /mytime - time left on your key\n\
             /generate <resource> - get a batch of lines",
        );
        if self.is_admin(user_id) {
            text.push_str(
                "\n\nAdmin:\n\
                 /genkey [token] [duration] - create a key (1d, 12h, lifetime)\n\
                 /revoke <KEY> - delete a key\n\
                 /broadcast <message> - message every key holder\n\
                 /stock - remaining lines per resource\n\
                 /restock <resource> - append lines (or send a .txt with that caption)\n\
                 /stats - counters",
            );
        }
        Reply::Text(text)
    }

    fn redeem(&self, user_id: i64, token: &str) -> Reply {
        let outcome = self.coordinator.entitlements().redeem(token, user_id);

        if let Some(metrics) = self.coordinator.metrics() {
            let label = match &outcome {
                Ok(_) => "ok",
                Err(e) => e.kind().as_str(),
            };
            metrics.redemptions_total.with_label_values(&[label]).inc();
        }

        match outcome {
            Ok(result) => {
                let headline = if result.already_owned {
                    "This key is already yours."
                } else {
                    "Key activated!"
                };
                Reply::Text(format!(
                    "{}\nKey: {}\nValid until: {}",
                    headline,
                    result.token,
                    display_expiry(result.expires_at)
                ))
            }
            Err(e) => {
                log::info!("Redeem of {} by {} rejected [{}]: {}", token, user_id, e.kind(), e);
                Reply::text(match e {
                    EntitlementError::InvalidToken(_) | EntitlementError::KeyNotFound(_) => {
                        "Invalid key.".to_string()
                    }
                    EntitlementError::AlreadyRedeemed(_) => "That key is already used by someone else.".to_string(),
                    EntitlementError::Expired { .. } => "This key has expired.".to_string(),
                    EntitlementError::AlreadyBound { token, .. } => {
                        format!("You already have an active key ({}).", token)
                    }
                    EntitlementError::TokenTaken(_) | EntitlementError::Storage(_) => TRY_AGAIN.to_string(),
                })
            }
        }
    }

    fn binding(&self, user_id: i64) -> Result<Option<KeyRecord>, Reply> {
        self.coordinator.entitlements().get_binding(user_id).map_err(|e| {
            log::error!("Binding lookup for {} failed: {}", user_id, e);
            Reply::text(TRY_AGAIN)
        })
    }

    fn my_key(&self, user_id: i64) -> Reply {
        let key = match self.binding(user_id) {
            Ok(Some(key)) => key,
            Ok(None) => return Reply::text("You don't have a key yet."),
            Err(reply) => return reply,
        };
        let now = self.coordinator.entitlements().now();
        let status = if key.is_expired_at(now) { " (expired)" } else { "" };
        Reply::Text(format!(
            "Key: {}\nValid until: {}{}",
            key.token,
            display_expiry(key.expires_at),
            status
        ))
    }

    fn my_time(&self, user_id: i64) -> Reply {
        let key = match self.binding(user_id) {
            Ok(Some(key)) => key,
            Ok(None) => return Reply::text("You don't have a key yet."),
            Err(reply) => return reply,
        };
        let now = self.coordinator.entitlements().now();

        match (key.expires_at, key.remaining_at(now)) {
            (None, _) | (_, None) => Reply::text("Your key is Lifetime. No expiration."),
            (Some(_), Some(remaining)) if remaining <= Duration::zero() => Reply::text("Your key has expired."),
            (Some(expires_at), Some(remaining)) => Reply::Text(format!(
                "Key: {}\nExpires on: {}\n\nTime remaining:\n{}",
                key.token,
                display_time(expires_at),
                format_remaining(remaining)
            )),
        }
    }

    fn generate_key(&self, admin_id: i64, token: Option<&str>, duration: DurationSpec) -> Reply {
        match self
            .coordinator
            .entitlements()
            .create_key(duration, Some(admin_id), token)
        {
            Ok(key) => Reply::Text(format!(
                "Key generated!\nKey: {}\nValid until: {}",
                key.token,
                display_expiry(key.expires_at)
            )),
            Err(EntitlementError::TokenTaken(token)) => Reply::Text(format!("Key {} already exists.", token)),
            Err(EntitlementError::InvalidToken(reason)) => Reply::Text(format!("Invalid token: {}.", reason)),
            Err(e) => {
                log::error!("Key creation by {} failed: {}", admin_id, e);
                Reply::text(TRY_AGAIN)
            }
        }
    }

    fn revoke(&self, token: &str) -> Reply {
        match self.coordinator.entitlements().revoke(token) {
            Ok(true) => Reply::Text(format!("Revoked key {}", token.trim())),
            Ok(false) => Reply::text("Key not found."),
            Err(e) => {
                log::error!("Revoking {} failed: {}", token, e);
                Reply::text(TRY_AGAIN)
            }
        }
    }

    fn broadcast(&self, text: &str) -> Reply {
        match self.coordinator.entitlements().bound_users() {
            Ok(recipients) => Reply::Broadcast {
                recipients,
                text: format!("Announcement\n\n{}", text),
            },
            Err(e) => {
                log::error!("Listing broadcast recipients failed: {}", e);
                Reply::text(TRY_AGAIN)
            }
        }
    }

    async fn stock(&self) -> Reply {
        let ledger = self.coordinator.ledger();
        let mut rows = Vec::with_capacity(ledger.resource_ids().len());
        for id in ledger.resource_ids() {
            match ledger.line_count(id).await {
                Ok(count) => rows.push(format!("{}: {}", id, count)),
                Err(e) => {
                    log::error!("Counting lines of {} failed: {}", id, e);
                    rows.push(format!("{}: unavailable", id));
                }
            }
        }
        if rows.is_empty() {
            return Reply::text("No resources configured.");
        }
        Reply::Text(format!("Stock\n{}", rows.join("\n")))
    }

    fn stats(&self) -> Reply {
        match self.coordinator.metrics() {
            Some(metrics) => Reply::Text(metrics.render()),
            None => Reply::text("Metrics are disabled."),
        }
    }

    async fn generate(&self, user_id: i64, resource: &str) -> Reply {
        let attempt = retry(&self.retry_config, || self.coordinator.generate(user_id, resource)).await;

        if let Some(metrics) = self.coordinator.metrics() {
            metrics.storage_retries_total.inc_by(u64::from(attempt.retries()));
        }

        match attempt.into_result() {
            Ok(result) => Reply::Document {
                file_name: result.file_name(),
                bytes: result.to_bytes(),
                caption: format!(
                    "Generation complete!\nResource: {}\nLines: {}\nRemaining: {}",
                    result.resource_id,
                    result.count(),
                    result.remaining
                ),
            },
            Err(GenerateError::Cooldown { seconds_remaining }) => Reply::Text(format!(
                "Please wait {} second(s) before generating again.",
                seconds_remaining
            )),
            Err(GenerateError::Unauthorized) => {
                Reply::text("You need a valid key first. Redeem one with /key <KEY>.")
            }
            Err(GenerateError::UnknownResource(_)) => Reply::text("Invalid option."),
            Err(GenerateError::EmptyResource(resource)) => {
                Reply::Text(format!("No more lines left for {}.", resource))
            }
            Err(GenerateError::Storage(_)) => Reply::text(TRY_AGAIN),
        }
    }

    async fn restock(&self, resource: &str, content: &str) -> Reply {
        match self.coordinator.ledger().replenish(resource, content).await {
            Ok((0, _)) => Reply::text("No lines found in the upload."),
            Ok((added, total)) => Reply::Text(format!(
                "Added {} line(s) to {}, {} total.",
                added,
                resource.trim().to_lowercase(),
                total
            )),
            Err(LedgerError::ResourceNotFound(id)) => Reply::Text(format!("Unknown resource: {}", id)),
            Err(e) => {
                log::error!("Restocking {} failed: {}", resource, e);
                Reply::text(TRY_AGAIN)
            }
        }
    }
}

fn display_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn display_expiry(expires_at: Option<DateTime<Utc>>) -> String {
    expires_at.map(display_time).unwrap_or_else(|| "Lifetime".to_string())
}

/// `D days, H hours, M minutes`, truncating seconds.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    format!("{} days, {} hours, {} minutes", days, hours, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::DispenseConfig;
    use crate::core::metrics::Metrics;
    use crate::dispense::RecordingAuditSink;
    use crate::entitlement::EntitlementStore;
    use crate::ledger::{LineLedger, MemoryBackend};
    use crate::storage::create_pool;
    use std::time::Duration as StdDuration;

    const ADMIN: i64 = 1;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        router: RequestRouter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_epoch());
        let store = EntitlementStore::new(create_pool(dir.path().join("keys.sqlite")).unwrap(), clock.clone());
        let ledger = LineLedger::new()
            .with_resource("codm", MemoryBackend::from_lines(["a", "b", "c"]))
            .with_resource("gmail", MemoryBackend::default());
        let coordinator = Coordinator::new(
            Arc::new(store),
            Arc::new(ledger),
            Arc::new(RecordingAuditSink::new()),
            DispenseConfig::new(2, StdDuration::from_secs(30)),
            clock.clone(),
        )
        .with_metrics(Arc::new(Metrics::new().unwrap()));
        let catalog = Catalog::from_pairs([("codm", "CODM.txt"), ("gmail", "Gmail.txt"), ("roblox", "Roblox.txt")]);
        let router = RequestRouter::new(Arc::new(coordinator), catalog, vec![ADMIN]);
        Fixture {
            _dir: dir,
            clock,
            router,
        }
    }

    async fn command(router: &RequestRouter, user_id: i64, name: &str, args: &str) -> Reply {
        router
            .handle(user_id, Request::from_command(name, args).unwrap())
            .await
    }

    #[tokio::test]
    async fn test_admin_commands_are_gated() {
        let f = fixture();
        let reply = command(&f.router, 42, "genkey", "lifetime").await;
        assert_eq!(reply.as_text(), "This command is for admins only.");

        let reply = command(&f.router, ADMIN, "genkey", "ABCD1234 lifetime").await;
        assert!(reply.as_text().contains("Key: ABCD1234"));
        assert!(reply.as_text().contains("Lifetime"));
    }

    #[tokio::test]
    async fn test_start_menu_needs_key() {
        let f = fixture();
        let reply = command(&f.router, 42, "start", "").await;
        assert!(matches!(reply, Reply::Text(_)));

        command(&f.router, ADMIN, "genkey", "ABCD1234").await;
        command(&f.router, 42, "key", "ABCD1234").await;

        match command(&f.router, 42, "start", "").await {
            Reply::Menu { options, .. } => {
                // roblox is in the catalog but not registered in the ledger
                let data: Vec<&str> = options.iter().map(|o| o.data.as_str()).collect();
                assert_eq!(data, vec!["codm", "gmail"]);
                assert_eq!(options[0].label, "CODM");
            }
            other => panic!("expected menu, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redeem_messages() {
        let f = fixture();
        command(&f.router, ADMIN, "genkey", "ABCD1234 1d").await;

        assert_eq!(command(&f.router, 42, "key", "NOPE").await.as_text(), "Invalid key.");
        assert!(command(&f.router, 42, "key", "ABCD1234")
            .await
            .as_text()
            .starts_with("Key activated!"));
        assert_eq!(
            command(&f.router, 43, "key", "ABCD1234").await.as_text(),
            "That key is already used by someone else."
        );
    }

    #[tokio::test]
    async fn test_mytime_counts_down() {
        let f = fixture();
        command(&f.router, ADMIN, "genkey", "ABCD1234 2d").await;
        command(&f.router, 42, "key", "ABCD1234").await;

        f.clock.advance(Duration::hours(1) + Duration::minutes(30));
        let reply = command(&f.router, 42, "mytime", "").await;
        assert!(reply.as_text().contains("1 days, 22 hours, 30 minutes"), "{}", reply.as_text());

        f.clock.advance(Duration::days(2));
        assert_eq!(command(&f.router, 42, "mytime", "").await.as_text(), "Your key has expired.");
        assert!(command(&f.router, 42, "mykey", "").await.as_text().ends_with("(expired)"));
    }

    #[tokio::test]
    async fn test_generate_returns_document() {
        let f = fixture();
        command(&f.router, ADMIN, "genkey", "ABCD1234").await;
        command(&f.router, 42, "key", "ABCD1234").await;

        let reply = f
            .router
            .handle(42, Request::from_callback("codm").unwrap())
            .await;
        match reply {
            Reply::Document { file_name, bytes, caption } => {
                assert_eq!(file_name, "codm_2.txt");
                assert_eq!(bytes, b"a\nb\n".to_vec());
                assert!(caption.contains("Remaining: 1"));
            }
            other => panic!("expected document, got {:?}", other),
        }

        let reply = command(&f.router, 42, "generate", "codm").await;
        assert!(reply.as_text().starts_with("Please wait 30 second(s)"));
    }

    #[tokio::test]
    async fn test_bare_generate_shows_resource_menu() {
        let f = fixture();
        command(&f.router, ADMIN, "genkey", "ABCD1234").await;
        command(&f.router, 42, "key", "ABCD1234").await;

        match command(&f.router, 42, "generate", "").await {
            Reply::Menu { options, .. } => assert_eq!(options.len(), 2),
            other => panic!("expected menu, got {:?}", other),
        }
        // Showing the menu does not start a cooldown
        let reply = f.router.handle(42, Request::from_callback("codm").unwrap()).await;
        assert!(matches!(reply, Reply::Document { .. }));
    }

    #[tokio::test]
    async fn test_stock_restock_and_broadcast() {
        let f = fixture();
        assert_eq!(command(&f.router, ADMIN, "stock", "").await.as_text(), "Stock\ncodm: 3\ngmail: 0");

        let reply = command(&f.router, ADMIN, "restock", "gmail\nx@example.com\n\ny@example.com").await;
        assert_eq!(reply.as_text(), "Added 2 line(s) to gmail, 2 total.");

        command(&f.router, ADMIN, "genkey", "ABCD1234").await;
        command(&f.router, 42, "key", "ABCD1234").await;
        match command(&f.router, ADMIN, "broadcast", "maintenance at noon").await {
            Reply::Broadcast { recipients, text } => {
                assert_eq!(recipients, vec![42]);
                assert!(text.ends_with("maintenance at noon"));
            }
            other => panic!("expected broadcast, got {:?}", other),
        }
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(
            format_remaining(Duration::days(3) + Duration::hours(4) + Duration::minutes(5) + Duration::seconds(59)),
            "3 days, 4 hours, 5 minutes"
        );
        assert_eq!(format_remaining(Duration::seconds(-5)), "0 days, 0 hours, 0 minutes");
    }
}
