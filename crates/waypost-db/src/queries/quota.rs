//! Per device, location and day quota counters.
//!
//! Rows are created by the first write of the day and never deleted. Both
//! increments are single upsert statements, so concurrent submissions from
//! the same device cannot lose updates.

use rusqlite::{Connection, OptionalExtension};

use crate::{to_u64, DbError, Result};

/// Counters for one `(device, location, day)` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayUsage {
    pub free_actions_used: u32,
    pub paid_actions_used: u32,
}

/// Read the counters for a key. Missing rows read as zero.
pub fn usage(conn: &Connection, device: &str, location: &str, day: u64) -> Result<DayUsage> {
    let row = conn
        .query_row(
            "SELECT free_actions_used, paid_actions_used FROM device_location_days
             WHERE device_session_id = ?1 AND location_id = ?2 AND day = ?3",
            rusqlite::params![device, location, day as i64],
            |row| {
                Ok(DayUsage {
                    free_actions_used: to_u64(row.get(0)?) as u32,
                    paid_actions_used: to_u64(row.get(1)?) as u32,
                })
            },
        )
        .optional()
        .map_err(DbError::Sqlite)?;
    Ok(row.unwrap_or_default())
}

/// Consume one free action if the day still has one left.
///
/// Returns `false` without writing when `free_actions_used` already reached
/// `limit`, which is how a losing concurrent request finds out the quota ran
/// out between its check and its write.
pub fn record_free_use(
    conn: &Connection,
    device: &str,
    location: &str,
    day: u64,
    limit: u32,
) -> Result<bool> {
    if limit == 0 {
        return Ok(false);
    }
    let changed = conn.execute(
        "INSERT INTO device_location_days
             (device_session_id, location_id, day, free_actions_used, paid_actions_used)
         VALUES (?1, ?2, ?3, 1, 0)
         ON CONFLICT (device_session_id, location_id, day)
         DO UPDATE SET free_actions_used = free_actions_used + 1
         WHERE free_actions_used < ?4",
        rusqlite::params![device, location, day as i64, limit as i64],
    )?;
    Ok(changed == 1)
}

/// Count one paid action.
pub fn record_paid_use(conn: &Connection, device: &str, location: &str, day: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO device_location_days
             (device_session_id, location_id, day, free_actions_used, paid_actions_used)
         VALUES (?1, ?2, ?3, 0, 1)
         ON CONFLICT (device_session_id, location_id, day)
         DO UPDATE SET paid_actions_used = paid_actions_used + 1",
        rusqlite::params![device, location, day as i64],
    )?;
    Ok(())
}
