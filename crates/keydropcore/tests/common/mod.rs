//! Shared fixtures for keydropcore integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keydropcore::core::clock::ManualClock;
use keydropcore::core::config::DispenseConfig;
use keydropcore::core::error::LedgerError;
use keydropcore::dispense::{Coordinator, RecordingAuditSink};
use keydropcore::entitlement::EntitlementStore;
use keydropcore::ledger::{LineBackend, LineLedger, MemoryBackend};
use keydropcore::storage::open_store;

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub clock: Arc<ManualClock>,
    pub store: Arc<EntitlementStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = open_store(dir.path().join("keys.sqlite")).expect("Failed to open store");
        let clock = Arc::new(ManualClock::at_epoch());
        let store = Arc::new(EntitlementStore::new(pool, clock.clone()));
        Self { dir, clock, store }
    }

    /// Creates a lifetime key and redeems it for `user_id`.
    pub fn authorize(&self, token: &str, user_id: i64) {
        self.store
            .create_key(keydropcore::entitlement::DurationSpec::Lifetime, Some(1), Some(token))
            .expect("Failed to create key");
        self.store.redeem(token, user_id).expect("Failed to redeem key");
    }

    pub fn coordinator(&self, ledger: LineLedger, batch_size: usize, cooldown: Duration) -> (Coordinator, Arc<RecordingAuditSink>) {
        let audit = Arc::new(RecordingAuditSink::new());
        let coordinator = Coordinator::new(
            self.store.clone(),
            Arc::new(ledger),
            audit.clone(),
            DispenseConfig::new(batch_size, cooldown),
            self.clock.clone(),
        );
        (coordinator, audit)
    }
}

/// `prefix-1` .. `prefix-n`
pub fn numbered_lines(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}-{}", prefix, i)).collect()
}

/// Memory backend whose next `failures` stores fail with an interrupted write.
pub struct FlakyBackend {
    inner: MemoryBackend,
    failures: AtomicUsize,
    stores: Arc<AtomicUsize>,
}

impl FlakyBackend {
    pub fn new(inner: MemoryBackend, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            stores: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never stores successfully.
    pub fn broken(inner: MemoryBackend) -> Self {
        Self::new(inner, usize::MAX)
    }

    /// Counts store attempts, failed ones included. Stays readable after
    /// the backend moves into a ledger.
    pub fn store_attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stores)
    }
}

#[async_trait]
impl LineBackend for FlakyBackend {
    async fn load(&self) -> Result<String, LedgerError> {
        self.inner.load().await
    }

    async fn store(&self, content: &str) -> Result<(), LedgerError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "write interrupted").into());
        }
        self.inner.store(content).await
    }

    fn describe(&self) -> String {
        "flaky memory".to_string()
    }
}
