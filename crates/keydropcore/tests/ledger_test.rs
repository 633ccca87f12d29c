//! Integration tests for the line ledger
//!
//! Run with: cargo test -p keydropcore --test ledger_test

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::numbered_lines;
use keydropcore::ledger::{Catalog, LineLedger, MemoryBackend};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_codm_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let lines = numbered_lines("codm", 250);
    std::fs::write(dir.path().join("CODM.txt"), lines.join("\n")).unwrap();

    let catalog = Catalog::from_pairs([("codm", "CODM.txt")]);
    let ledger = LineLedger::from_catalog(dir.path(), &catalog);

    let (taken, remaining) = ledger.dispense("codm", 100).await.unwrap();
    assert_eq!((taken.len(), remaining), (100, 150));
    assert_eq!(taken[0], "codm-1");

    let (taken, remaining) = ledger.dispense("codm", 100).await.unwrap();
    assert_eq!((taken.len(), remaining), (100, 50));
    assert_eq!(taken[0], "codm-101");

    let (taken, remaining) = ledger.dispense("codm", 100).await.unwrap();
    assert_eq!((taken.len(), remaining), (50, 0));
    assert_eq!(taken.last().map(String::as_str), Some("codm-250"));

    assert_eq!(ledger.dispense("codm", 100).await.unwrap(), (Vec::new(), 0));
    assert_eq!(std::fs::read_to_string(dir.path().join("CODM.txt")).unwrap(), "");
}

#[tokio::test]
async fn test_exhaustion_preserves_order_without_duplicates() {
    for (total, batch) in [(1, 1), (17, 5), (100, 100), (99, 7), (250, 100)] {
        let original = numbered_lines("line", total);
        let ledger = LineLedger::new().with_resource("r", MemoryBackend::from_lines(&original));

        let mut collected = Vec::new();
        loop {
            let (taken, remaining) = ledger.dispense("r", batch).await.unwrap();
            if taken.is_empty() {
                assert_eq!(remaining, 0);
                break;
            }
            assert!(taken.len() <= batch);
            collected.extend(taken);
        }

        assert_eq!(collected, original, "total={} batch={}", total, batch);
    }
}

#[tokio::test]
async fn test_blank_lines_are_never_counted() {
    let ledger = LineLedger::new().with_resource("gmail", MemoryBackend::new("\n a@x \n\n   \nb@x\n\n"));
    assert_eq!(ledger.line_count("gmail").await.unwrap(), 2);
    let (taken, remaining) = ledger.dispense("gmail", 10).await.unwrap();
    assert_eq!(taken, vec!["a@x", "b@x"]);
    assert_eq!(remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispense_never_overlaps() {
    let original = numbered_lines("acc", 200);
    let backend = MemoryBackend::from_lines(&original).with_delay(Duration::from_millis(20));
    let ledger = Arc::new(LineLedger::new().with_resource("codm", backend));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.dispense("codm", 30).await.unwrap().0 })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        let batch = task.await.unwrap();
        total += batch.len();
        for line in batch {
            assert!(seen.insert(line.clone()), "line {} dispensed twice", line);
        }
    }

    assert_eq!(total, 200);
    assert_eq!(ledger.line_count("codm").await.unwrap(), 0);
}

#[tokio::test]
async fn test_different_resources_are_independent() {
    let ledger = LineLedger::new()
        .with_resource("codm", MemoryBackend::from_lines(numbered_lines("c", 3)))
        .with_resource("gmail", MemoryBackend::from_lines(numbered_lines("g", 3)));

    ledger.dispense("codm", 3).await.unwrap();
    assert_eq!(ledger.line_count("codm").await.unwrap(), 0);
    assert_eq!(ledger.line_count("gmail").await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_file_is_served_by_one_resource() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("CODM.txt"), numbered_lines("acc", 120).join("\n")).unwrap();

    let catalog = Catalog::from_pairs([("codm", "CODM.txt"), ("cod", "codm.txt")]);
    let ledger = Arc::new(LineLedger::from_catalog(dir.path(), &catalog));
    assert_eq!(ledger.resource_ids().to_vec(), vec!["codm".to_string()]);
    assert!(!ledger.contains("cod"));

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.dispense("codm", 10).await.unwrap().0 })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        for line in task.await.unwrap() {
            assert!(seen.insert(line.clone()), "line {} dispensed twice", line);
        }
    }
    assert_eq!(seen.len(), 120);
}
