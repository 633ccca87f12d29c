//! Where a resource's text lives
//!
//! The ledger only ever calls `load` then `store` while holding the resource's
//! lock, so backends need no locking of their own around that pair.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::core::error::LedgerError;

#[async_trait]
pub trait LineBackend: Send + Sync {
    /// Full backing text. A source that does not exist yet reads as empty.
    async fn load(&self) -> Result<String, LedgerError>;

    /// Replaces the backing text. Must be durable when it returns `Ok`.
    async fn store(&self, content: &str) -> Result<(), LedgerError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// A resource backed by a text file.
///
/// Writes go to a sibling temp file that is fsynced and renamed over the
/// original, so a crash leaves either the old or the new content.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl LineBackend for FileBackend {
    async fn load(&self) -> Result<String, LedgerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, content: &str) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;

        flush_parent_dir(&self.path).await;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Best-effort directory flush after a rename.
///
/// The new content is already in place, so a failure here is logged and
/// the store still succeeds.
async fn flush_parent_dir(path: &Path) {
    if let Err(e) = sync_parent_dir(path).await {
        log::warn!("Could not sync directory of {}: {}", path.display(), e);
    }
}

/// The rename itself is only durable once the directory entry is flushed.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => tokio::fs::File::open(parent).await?.sync_all().await,
        None => Ok(()),
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// A resource held in memory, for tests and ephemeral setups.
///
/// With a delay set, `load` pauses after reading, widening the window in
/// which an unserialized read-modify-write would interleave.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    content: Mutex<String>,
    delay: Option<Duration>,
}

impl MemoryBackend {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Mutex::new(content.into()),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Builds content with one line per item.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }
        Self::new(content)
    }

    fn snapshot(&self) -> String {
        self.content
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LineBackend for MemoryBackend {
    async fn load(&self) -> Result<String, LedgerError> {
        let content = self.snapshot();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(content)
    }

    async fn store(&self, content: &str) -> Result<(), LedgerError> {
        *self.content.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = content.to_string();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("absent.txt"));
        assert_eq!(backend.load().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_file_store_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CODM.txt");
        std::fs::write(&path, "a\nb\nc\n").unwrap();

        let backend = FileBackend::new(&path);
        backend.store("c\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c\n");
        assert!(!backend.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_store_creates_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files").join("Gmail.txt");

        FileBackend::new(&path).store("x\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_flush_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let orphan = dir.path().join("gone").join("CODM.txt");

        assert!(sync_parent_dir(&orphan).await.is_err());
        // Completes without surfacing the error
        flush_parent_dir(&orphan).await;
    }

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::from_lines(["one", "two"]);
        assert_eq!(backend.load().await.unwrap(), "one\ntwo\n");
        backend.store("two\n").await.unwrap();
        assert_eq!(backend.load().await.unwrap(), "two\n");
    }
}
