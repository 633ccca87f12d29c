//! Line ledger: per-resource sequences consumed from the front
//!
//! Each resource has its own async mutex held across the whole
//! load -> take -> store cycle. Two dispenses of the same resource therefore
//! never see the same lines, while different resources proceed in parallel.
//! The remainder is persisted before any line is handed out.

pub mod backend;
pub mod catalog;

use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

use crate::core::error::LedgerError;

pub use backend::{FileBackend, LineBackend, MemoryBackend};
pub use catalog::{Catalog, CatalogEntry};

/// Splits backing text into lines: trimmed, blank ones dropped.
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inverse of [`parse_lines`]: one line per row, trailing newline when non-empty.
pub fn render_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

struct Resource {
    backend: Mutex<Box<dyn LineBackend>>,
}

/// Owns every resource's line sequence.
#[derive(Default)]
pub struct LineLedger {
    resources: HashMap<String, Resource>,
    order: Vec<String>,
}

impl LineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// One file backend per catalog entry, resolved against `dir`.
    pub fn from_catalog(dir: impl AsRef<Path>, catalog: &Catalog) -> Self {
        let dir = dir.as_ref();
        let mut ledger = Self::new();
        for entry in catalog.entries() {
            ledger.register(&entry.id, Box::new(FileBackend::new(dir.join(&entry.file_name))));
        }
        ledger
    }

    /// Adds a resource. Ids are case-insensitive; re-registering replaces the backend.
    pub fn register(&mut self, id: &str, backend: Box<dyn LineBackend>) {
        let id = normalize(id);
        log::debug!("Resource {} -> {}", id, backend.describe());
        if !self.resources.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.resources.insert(
            id,
            Resource {
                backend: Mutex::new(backend),
            },
        );
    }

    #[must_use]
    pub fn with_resource(mut self, id: &str, backend: impl LineBackend + 'static) -> Self {
        self.register(id, Box::new(backend));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(&normalize(id))
    }

    /// Registered ids in registration order.
    pub fn resource_ids(&self) -> &[String] {
        &self.order
    }

    fn resource(&self, id: &str) -> Result<&Resource, LedgerError> {
        self.resources
            .get(&normalize(id))
            .ok_or_else(|| LedgerError::ResourceNotFound(id.trim().to_string()))
    }

    /// Removes up to `count` lines from the front of `id`.
    ///
    /// Returns the lines taken, in original order, and how many remain.
    /// An empty resource yields `([], 0)`.
    pub async fn dispense(&self, id: &str, count: usize) -> Result<(Vec<String>, usize), LedgerError> {
        let resource = self.resource(id)?;
        let backend = resource.backend.lock().await;

        let mut lines = parse_lines(&backend.load().await?);
        if lines.is_empty() || count == 0 {
            return Ok((Vec::new(), lines.len()));
        }

        let taken: Vec<String> = lines.drain(..count.min(lines.len())).collect();
        backend.store(&render_lines(&lines)).await?;

        log::info!(
            "Dispensed {} line(s) from {}, {} remaining",
            taken.len(),
            backend.describe(),
            lines.len()
        );
        Ok((taken, lines.len()))
    }

    /// Lines left in `id`.
    pub async fn line_count(&self, id: &str) -> Result<usize, LedgerError> {
        let resource = self.resource(id)?;
        let backend = resource.backend.lock().await;
        Ok(parse_lines(&backend.load().await?).len())
    }

    /// Appends the non-blank lines of `content` to `id`.
    ///
    /// Returns `(added, total)`.
    pub async fn replenish(&self, id: &str, content: &str) -> Result<(usize, usize), LedgerError> {
        let resource = self.resource(id)?;
        let backend = resource.backend.lock().await;

        let mut lines = parse_lines(&backend.load().await?);
        let added = parse_lines(content);
        if added.is_empty() {
            return Ok((0, lines.len()));
        }

        let count = added.len();
        lines.extend(added);
        backend.store(&render_lines(&lines)).await?;

        log::info!("Replenished {} with {} line(s), {} total", backend.describe(), count, lines.len());
        Ok((count, lines.len()))
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered(n: usize) -> MemoryBackend {
        MemoryBackend::from_lines((1..=n).map(|i| format!("line-{}", i)))
    }

    #[test]
    fn test_parse_lines_drops_blanks() {
        assert_eq!(parse_lines("  a \n\n\t\nb\r\n  \nc"), vec!["a", "b", "c"]);
        assert!(parse_lines("\n \n").is_empty());
    }

    #[test]
    fn test_render_lines() {
        assert_eq!(render_lines(&[]), "");
        assert_eq!(render_lines(&["a".to_string(), "b".to_string()]), "a\nb\n");
    }

    #[tokio::test]
    async fn test_dispense_takes_from_front() {
        let ledger = LineLedger::new().with_resource("codm", numbered(5));

        let (lines, remaining) = ledger.dispense("codm", 2).await.unwrap();
        assert_eq!(lines, vec!["line-1", "line-2"]);
        assert_eq!(remaining, 3);

        let (lines, remaining) = ledger.dispense("CODM", 10).await.unwrap();
        assert_eq!(lines, vec!["line-3", "line-4", "line-5"]);
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_empty_resource_is_not_an_error() {
        let ledger = LineLedger::new().with_resource("gmail", MemoryBackend::new("\n\n"));
        assert_eq!(ledger.dispense("gmail", 100).await.unwrap(), (Vec::new(), 0));
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let ledger = LineLedger::new();
        let err = ledger.dispense("nope", 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::ResourceNotFound(ref id) if id == "nope"));
        assert!(ledger.line_count("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_replenish_appends() {
        let ledger = LineLedger::new().with_resource("roblox", numbered(1));
        assert_eq!(ledger.replenish("roblox", "x\n\n y \n").await.unwrap(), (2, 3));

        let (lines, _) = ledger.dispense("roblox", 3).await.unwrap();
        assert_eq!(lines, vec!["line-1", "x", "y"]);
    }

    #[tokio::test]
    async fn test_file_catalog_persists_remainder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CODM.txt"), "a\n\nb\nc\n").unwrap();
        let catalog = Catalog::from_pairs([("codm", "CODM.txt"), ("gmail", "Gmail.txt")]);
        let ledger = LineLedger::from_catalog(dir.path(), &catalog);

        assert_eq!(ledger.resource_ids(), &["codm".to_string(), "gmail".to_string()]);
        assert_eq!(ledger.dispense("codm", 1).await.unwrap(), (vec!["a".to_string()], 2));
        assert_eq!(std::fs::read_to_string(dir.path().join("CODM.txt")).unwrap(), "b\nc\n");

        // Missing file counts as empty
        assert_eq!(ledger.line_count("gmail").await.unwrap(), 0);
    }
}
