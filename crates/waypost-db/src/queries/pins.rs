//! Pin query functions.

use rusqlite::{Connection, OptionalExtension, Row};
use waypost_types::pin::Pin;

use crate::{to_u64, DbError, Result};

const COLUMNS: &str =
    "id, location_id, device_session_id, parent_id, body, created_at, deleted_at, boosted_until";

/// Insert a pin.
pub fn insert(conn: &Connection, pin: &Pin) -> Result<()> {
    conn.execute(
        "INSERT INTO pins
         (id, location_id, device_session_id, parent_id, body, created_at, deleted_at,
          boosted_until)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            pin.id,
            pin.location_id,
            pin.device_session_id,
            pin.parent_id,
            pin.body,
            pin.created_at as i64,
            pin.deleted_at.map(|t| t as i64),
            pin.boosted_until.map(|t| t as i64),
        ],
    )?;
    Ok(())
}

/// Look up a pin by id.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Pin>> {
    let sql = format!("SELECT {COLUMNS} FROM pins WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], pin_from_row).optional()?)
}

/// Creation time of the device's latest top-level pin at a location.
///
/// Deleted pins still count, otherwise deleting would reset the cooldown.
pub fn last_top_level_at(conn: &Connection, device: &str, location: &str) -> Result<Option<u64>> {
    let latest: Option<i64> = conn.query_row(
        "SELECT MAX(created_at) FROM pins
         WHERE device_session_id = ?1 AND location_id = ?2 AND parent_id IS NULL",
        rusqlite::params![device, location],
        |row| row.get(0),
    )?;
    Ok(latest.map(to_u64))
}

/// Soft-delete a pin. Returns `false` if it was already deleted.
pub fn soft_delete(conn: &Connection, id: &str, now: u64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE pins SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        rusqlite::params![id, now as i64],
    )?;
    Ok(changed == 1)
}

/// Extend a live pin's boost window by `duration` seconds, starting from
/// `now` if the previous boost already lapsed. Returns the new end.
pub fn extend_boost(conn: &Connection, id: &str, now: u64, duration: u64) -> Result<u64> {
    conn.query_row(
        "UPDATE pins SET boosted_until = MAX(COALESCE(boosted_until, 0), ?2) + ?3
         WHERE id = ?1 AND deleted_at IS NULL
         RETURNING boosted_until",
        rusqlite::params![id, now as i64, duration as i64],
        |row| row.get::<_, i64>(0),
    )
    .map(to_u64)
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("live pin '{id}'")),
        other => DbError::Sqlite(other),
    })
}

fn pin_from_row(row: &Row<'_>) -> rusqlite::Result<Pin> {
    Ok(Pin {
        id: row.get(0)?,
        location_id: row.get(1)?,
        device_session_id: row.get(2)?,
        parent_id: row.get(3)?,
        body: row.get(4)?,
        created_at: to_u64(row.get(5)?),
        deleted_at: row.get::<_, Option<i64>>(6)?.map(to_u64),
        boosted_until: row.get::<_, Option<i64>>(7)?.map(to_u64),
    })
}
