//! # waypost-db
//!
//! Ledger storage for the Waypost metering core.
//! Manages the single SQLite database at `$WAYPOST_DATA_DIR/waypost.db`.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced
//! - All timestamps are Unix epoch seconds (u64)
//! - Schema version stored in `PRAGMA user_version`
//!
//! Every read-modify-write on a ledger row is either a single guarded
//! statement (upsert-with-increment, compare-and-set update) or runs inside
//! an immediate transaction, so several processes may share one database file.

pub mod migrations;
pub mod queries;
pub mod schema;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;

pub use waypost_types::invoice::InvoiceConflict;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invoice rejected: {0}")]
    Invoice(InvoiceConflict),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the Waypost database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Start a transaction that takes the write lock up front.
///
/// Deferred transactions in WAL mode fail with `SQLITE_BUSY` instead of
/// waiting when they upgrade from read to write, so every ledger
/// read-then-write goes through here.
pub fn begin_immediate(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

/// Convert a stored INTEGER back to `u64`.
pub(crate) fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}
