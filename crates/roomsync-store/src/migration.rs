//! SQLite schema setup.
//!
//! The schema version lives in `PRAGMA user_version`. Each entry of
//! [`STEPS`] moves the schema one version forward; a database at version N
//! has had the first N steps applied.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema steps, oldest first.
const STEPS: &[&str] = &[
    // 1: one JSON document per key.
    "CREATE TABLE documents (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );",
];

/// Schema version this build writes.
pub fn schema_version() -> u32 {
    STEPS.len() as u32
}

/// Bring the schema up to [`schema_version`]. Safe to call on every open.
///
/// A database written by a newer build is refused rather than guessed at.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let target = schema_version();
    if found > target {
        return Err(StoreError::Migration(format!(
            "schema version {} is newer than supported version {}",
            found, target
        )));
    }
    if found == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &STEPS[found as usize..] {
        tx.execute_batch(step)?;
    }
    // PRAGMA does not take bound parameters.
    tx.execute_batch(&format!("PRAGMA user_version = {}", target))?;
    tx.commit()?;

    tracing::debug!(from = found, to = target, "migrated room store schema");
    Ok(())
}
