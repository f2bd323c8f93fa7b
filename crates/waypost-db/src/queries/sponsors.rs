//! Sponsorship chain query functions.
//!
//! A location's chain is every bid whose window has not closed yet. Rows are
//! never deleted; expired bids simply drop out of the live chain.

use rusqlite::{Connection, Row};
use waypost_types::sponsor::SponsorBid;

use crate::{to_u64, DbError, Result};

const COLUMNS: &str = "id, location_id, sponsor_label, sponsor_url, amount_sats, invoice_id,
     paid_at, activates_at, expires_at";

/// Append an accepted bid to the chain.
pub fn insert(conn: &Connection, bid: &SponsorBid, device: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sponsor_bids
         (id, location_id, sponsor_label, sponsor_url, amount_sats, invoice_id,
          device_session_id, paid_at, activates_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            bid.id,
            bid.location_id,
            bid.sponsor_label,
            bid.sponsor_url,
            bid.amount_sats as i64,
            bid.invoice_id,
            device,
            bid.paid_at as i64,
            bid.activates_at as i64,
            bid.expires_at as i64,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(msg.unwrap_or_else(|| "sponsor slot collision".to_string()))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(())
}

/// Bids at `location` still current or scheduled at `now`, in chain order
/// `(activates_at, amount_sats desc, paid_at)`.
pub fn live_chain(conn: &Connection, location: &str, now: u64) -> Result<Vec<SponsorBid>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sponsor_bids
         WHERE location_id = ?1 AND expires_at > ?2
         ORDER BY activates_at ASC, amount_sats DESC, paid_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![location, now as i64], bid_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All bids ever accepted at a location, newest first.
pub fn history(conn: &Connection, location: &str, limit: u32) -> Result<Vec<SponsorBid>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM sponsor_bids
         WHERE location_id = ?1
         ORDER BY activates_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![location, limit], bid_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn bid_from_row(row: &Row<'_>) -> rusqlite::Result<SponsorBid> {
    Ok(SponsorBid {
        id: row.get(0)?,
        location_id: row.get(1)?,
        sponsor_label: row.get(2)?,
        sponsor_url: row.get(3)?,
        amount_sats: to_u64(row.get(4)?),
        invoice_id: row.get(5)?,
        paid_at: to_u64(row.get(6)?),
        activates_at: to_u64(row.get(7)?),
        expires_at: to_u64(row.get(8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_types::invoice::Invoice;
    use waypost_types::{InvoiceStatus, Purpose};

    const DAY: u64 = 86_400;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn seed_invoice(conn: &Connection, id: &str, amount: u64) {
        crate::queries::invoices::insert(
            conn,
            &Invoice {
                id: id.to_string(),
                purpose: Purpose::Sponsor,
                subject_ref: None,
                device_session_id: "dev-a".into(),
                location_id: "loc-1".into(),
                amount_sats: amount,
                payment_request: format!("lnsim1{id}"),
                status: InvoiceStatus::Used,
                created_at: 0,
                expires_at: 900,
                paid_at: Some(1),
                used_at: Some(2),
                payload: None,
            },
        )
        .expect("seed invoice");
    }

    fn bid(id: &str, amount: u64, activates_at: u64) -> SponsorBid {
        SponsorBid {
            id: id.to_string(),
            location_id: "loc-1".into(),
            sponsor_label: format!("Sponsor {id}"),
            sponsor_url: None,
            amount_sats: amount,
            invoice_id: format!("inv-{id}"),
            paid_at: activates_at,
            activates_at,
            expires_at: activates_at + DAY,
        }
    }

    fn append(conn: &Connection, b: &SponsorBid) {
        seed_invoice(conn, &b.invoice_id, b.amount_sats);
        insert(conn, b, "dev-a").expect("insert bid");
    }

    #[test]
    fn test_live_chain_order_and_expiry() {
        let conn = test_db();
        append(&conn, &bid("a", 10, 0));
        append(&conn, &bid("b", 20, DAY));
        append(&conn, &bid("c", 30, 2 * DAY));

        let chain = live_chain(&conn, "loc-1", 10).expect("chain");
        let ids: Vec<_> = chain.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        // Once `a` lapses it leaves the live chain.
        let chain = live_chain(&conn, "loc-1", DAY).expect("chain");
        let ids: Vec<_> = chain.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);

        assert!(live_chain(&conn, "loc-2", 10).expect("other").is_empty());
    }

    #[test]
    fn test_slot_collision_rejected() {
        let conn = test_db();
        append(&conn, &bid("a", 10, 0));
        let clash = SponsorBid {
            id: "b".into(),
            invoice_id: "inv-b".into(),
            ..bid("b", 20, 0)
        };
        seed_invoice(&conn, "inv-b", 20);
        assert!(matches!(
            insert(&conn, &clash, "dev-a"),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_history_keeps_expired() {
        let conn = test_db();
        append(&conn, &bid("a", 10, 0));
        append(&conn, &bid("b", 20, DAY));
        let all = history(&conn, "loc-1", 10).expect("history");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "b");
    }
}
