use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::time::{sleep, Duration};

use keydropcore::config::{self, DispenseConfig, KeyConfig};
use keydropcore::core::clock::{Clock, SystemClock};
use keydropcore::core::retry::RetryConfig;
use keydropcore::core::{init_logger, Metrics};
use keydropcore::dispense::{AuditSink, LogAuditSink};
use keydropcore::entitlement::DurationSpec;
use keydropcore::ledger::Catalog;
use keydropcore::storage::legacy::read_legacy_keys;
use keydropcore::storage::open_store;
use keydropcore::{Coordinator, EntitlementStore, LineLedger, RequestRouter};

mod cli;
mod telegram;

use cli::{Cli, Commands};
use telegram::{create_bot, notify_admin_startup, schema, setup_bot_commands, HandlerDeps, TelegramAuditSink};

/// Dispatcher restarts after a panic before giving up
const MAX_DISPATCHER_RETRIES: u32 = 5;
/// `get_me` attempts while the Bot API is still coming up (5s apart)
const STARTUP_MAX_RETRIES: u32 = 60;

/// Main entry point for the keydrop bot
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env before any config is read
    let _ = dotenv();

    let cli = Cli::parse_args();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run) | None => run_bot().await,
        Some(Commands::Genkey { duration, token }) => run_genkey(&duration, token.as_deref()),
        Some(Commands::Revoke { token }) => run_revoke(&token),
        Some(Commands::ImportLegacy { path }) => run_import(&path),
        Some(Commands::Stock) => run_stock().await,
    }
}

fn open_entitlements(clock: Arc<dyn Clock>) -> Result<EntitlementStore> {
    let pool = open_store(config::DATABASE_PATH.as_str())?;
    Ok(EntitlementStore::new(pool, clock)
        .with_key_config(KeyConfig::from_env())
        .allow_rebind(*config::dispense::ALLOW_REBIND))
}

fn run_genkey(duration: &str, token: Option<&str>) -> Result<()> {
    let store = open_entitlements(Arc::new(SystemClock))?;
    let record = store.create_key(DurationSpec::parse(duration), None, token)?;
    let expires = record
        .expires_at
        .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("{}\texpires: {}", record.token, expires);
    Ok(())
}

fn run_revoke(token: &str) -> Result<()> {
    let store = open_entitlements(Arc::new(SystemClock))?;
    if store.revoke(token)? {
        println!("Revoked {}", token);
    } else {
        println!("Key not found: {}", token);
    }
    Ok(())
}

fn run_import(path: &std::path::Path) -> Result<()> {
    let store = open_entitlements(Arc::new(SystemClock))?;
    let report = store.import_legacy(&read_legacy_keys(path))?;
    println!(
        "Imported {} key(s) ({} skipped), {} binding(s) ({} skipped)",
        report.keys_imported, report.keys_skipped, report.bindings_imported, report.bindings_skipped
    );
    Ok(())
}

async fn run_stock() -> Result<()> {
    let catalog = Catalog::from_env();
    let ledger = LineLedger::from_catalog(&*config::resources::RESOURCES_DIR, &catalog);
    println!("{}", stock_summary(&ledger).await);
    Ok(())
}

async fn stock_summary(ledger: &LineLedger) -> String {
    let mut lines = Vec::with_capacity(ledger.resource_ids().len());
    for id in ledger.resource_ids() {
        match ledger.line_count(id).await {
            Ok(count) => lines.push(format!("{}: {}", id, count)),
            Err(e) => lines.push(format!("{}: unavailable ({})", id, e)),
        }
    }
    lines.join("\n")
}

/// Runs the Telegram bot
async fn run_bot() -> Result<()> {
    log::info!("Starting keydrop bot...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_entitlements(clock.clone())?;

    if let Some(path) = config::LEGACY_KEYS_FILE.as_deref() {
        let snapshot = read_legacy_keys(path);
        if !snapshot.is_empty() {
            let report = store.import_legacy(&snapshot)?;
            log::info!(
                "Legacy import from {}: {} key(s), {} binding(s)",
                path,
                report.keys_imported,
                report.bindings_imported
            );
        }
    }

    let resources_dir = &*config::resources::RESOURCES_DIR;
    if let Err(e) = tokio::fs::create_dir_all(resources_dir).await {
        log::warn!("Cannot create resources directory {}: {}", resources_dir.display(), e);
    }
    let catalog = Catalog::from_env();
    let ledger = LineLedger::from_catalog(resources_dir, &catalog);
    let stock = stock_summary(&ledger).await;
    log::info!("Resources loaded:\n{}", stock);

    let bot = create_bot()?;

    let admin_id = *config::admin::ADMIN_USER_ID;
    let audit: Arc<dyn AuditSink> = if admin_id != 0 {
        Arc::new(TelegramAuditSink::new(bot.clone(), admin_id))
    } else {
        log::warn!("No admin configured, dispense audit goes to the log only");
        Arc::new(LogAuditSink)
    };

    let metrics = Arc::new(Metrics::new()?);
    let coordinator = Coordinator::new(
        Arc::new(store),
        Arc::new(ledger),
        audit,
        DispenseConfig::from_env(),
        clock,
    )
    .with_metrics(metrics);

    let mut admins = config::admin::ADMIN_IDS.clone();
    if admin_id != 0 && !admins.contains(&admin_id) {
        admins.push(admin_id);
    }
    let router = RequestRouter::new(Arc::new(coordinator), catalog, admins);
    let handler = schema(HandlerDeps::new(Arc::new(router)));

    // Retry while a local Bot API server is still initializing
    let bot_info = {
        let mut startup_retry = 0;
        loop {
            match bot.get_me().await {
                Ok(info) => break info,
                Err(e) => {
                    let err_str = e.to_string();
                    let is_retryable = err_str.contains("restart")
                        || err_str.contains("network")
                        || err_str.contains("connection")
                        || err_str.contains("timed out");

                    startup_retry += 1;
                    if startup_retry >= STARTUP_MAX_RETRIES || !is_retryable {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to Bot API after {} retries: {}",
                            startup_retry,
                            e
                        ));
                    }
                    log::warn!(
                        "Bot API not ready (attempt {}/{}): {}. Retrying in 5 seconds...",
                        startup_retry,
                        STARTUP_MAX_RETRIES,
                        err_str
                    );
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    };
    log::info!("Bot username: {:?}, Bot ID: {}", bot_info.username, bot_info.id);

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }
    notify_admin_startup(&bot, admin_id, &stock).await;

    let backoff = RetryConfig::new().initial_delay(Duration::from_secs(2)).max_delay(Duration::from_secs(60));
    let mut retry_count = 0;
    loop {
        let bot_clone = bot.clone();
        let handler_clone = handler.clone();

        // Own task so a panicking dispatcher can be restarted
        let handle = tokio::spawn(async move {
            let listener = Polling::builder(bot_clone.clone()).drop_pending_updates().build();

            Dispatcher::builder(bot_clone, handler_clone)
                .dependencies(DependencyMap::new())
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() => {
                log::error!("Dispatcher panicked: {}", join_err);
                if retry_count >= MAX_DISPATCHER_RETRIES {
                    log::error!("Max retries reached after panic. Exiting...");
                    break;
                }
                retry_count += 1;
                let delay = backoff.delay_for_attempt(retry_count);
                log::info!(
                    "Restarting dispatcher in {:?} (attempt {}/{})",
                    delay,
                    retry_count,
                    MAX_DISPATCHER_RETRIES
                );
                sleep(delay).await;
            }
            Err(join_err) => {
                log::warn!("Dispatcher task was cancelled: {}", join_err);
                break;
            }
        }
    }

    Ok(())
}
