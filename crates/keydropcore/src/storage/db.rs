use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::StorageError;
use crate::storage::migrations::run_migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// How long a writer waits on a locked database before giving up with SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn connection_manager(database_path: &Path) -> SqliteConnectionManager {
    SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL + synchronous=FULL: a commit is on disk before execute() returns
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;",
        )
    })
}

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 8 connections and runs schema migrations.
/// Does not inspect the file for corruption; use [`open_store`] for that.
///
/// # Arguments
///
/// * `database_path` - Path to SQLite database file
pub fn create_pool(database_path: impl AsRef<Path>) -> Result<DbPool, StorageError> {
    let pool = Pool::builder()
        .max_size(8)
        .connection_timeout(Duration::from_secs(10))
        .build(connection_manager(database_path.as_ref()))?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, StorageError> {
    Ok(pool.get()?)
}

/// Opens the key store, recovering from a corrupt file.
///
/// A file that SQLite refuses to read as a database is moved aside to
/// `<path>.corrupt-<unix seconds>` and replaced by an empty, migrated store.
/// Any other failure (permissions, missing directory) is returned as is.
pub fn open_store(database_path: impl AsRef<Path>) -> Result<DbPool, StorageError> {
    let path = database_path.as_ref();

    match integrity_check(path) {
        Ok(()) => {}
        Err(e) if is_corruption(&e) => {
            let moved_to = quarantine(path)?;
            log::error!(
                "Key store {} is corrupt ({}); moved to {} and starting with an empty store",
                path.display(),
                e,
                moved_to.display()
            );
        }
        Err(e) => return Err(e.into()),
    }

    create_pool(path)
}

/// Touches the file the way the pool would and runs an integrity check.
fn integrity_check(path: &Path) -> Result<(), rusqlite::Error> {
    if !path.exists() {
        return Ok(());
    }
    let conn = Connection::open(path)?;
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            Some(verdict),
        ))
    }
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn quarantine(path: &Path) -> Result<PathBuf, StorageError> {
    let stamp = chrono::Utc::now().timestamp();
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", stamp));
    let target = PathBuf::from(target);

    std::fs::rename(path, &target)?;

    // Journal sidecars belong to the broken file; a fresh store must not replay them
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                log::warn!("Failed to remove {}: {}", sidecar.display(), e);
            }
        }
    }

    Ok(target)
}
