//! Invoice ledger query functions.
//!
//! Status only moves forward: `pending -> paid -> used`, or
//! `pending|paid -> expired`. Every transition is a compare-and-set on the
//! current status so two writers can never both win.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use waypost_types::invoice::Invoice;
use waypost_types::{InvoiceStatus, Purpose};

use crate::{to_u64, DbError, InvoiceConflict, Result};

const COLUMNS: &str = "id, purpose, subject_ref, device_session_id, location_id, amount_sats,
     payment_request, status, created_at, expires_at, paid_at, used_at, payload";

/// Insert a freshly opened invoice.
pub fn insert(conn: &Connection, invoice: &Invoice) -> Result<()> {
    let payload = invoice
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DbError::Serialization(e.to_string()))?;

    conn.execute(
        "INSERT INTO invoices
         (id, purpose, subject_ref, device_session_id, location_id, amount_sats,
          payment_request, status, created_at, expires_at, paid_at, used_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            invoice.id,
            invoice.purpose.as_str(),
            invoice.subject_ref,
            invoice.device_session_id,
            invoice.location_id,
            invoice.amount_sats as i64,
            invoice.payment_request,
            invoice.status.as_str(),
            invoice.created_at as i64,
            invoice.expires_at as i64,
            invoice.paid_at.map(|t| t as i64),
            invoice.used_at.map(|t| t as i64),
            payload,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!(
                "invoice {}: {}",
                invoice.id,
                msg.unwrap_or_else(|| "constraint failed".to_string())
            ))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(())
}

/// Look up an invoice by id.
pub fn find(conn: &Connection, id: &str) -> Result<Option<Invoice>> {
    let sql = format!("SELECT {COLUMNS} FROM invoices WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], invoice_from_row).optional()?)
}

/// Look up an invoice by id, failing with `NotFound` if absent.
pub fn get(conn: &Connection, id: &str) -> Result<Invoice> {
    find(conn, id)?.ok_or_else(|| DbError::NotFound(format!("invoice '{id}'")))
}

/// `pending -> paid`, unless the invoice already expired.
///
/// Returns whether this call performed the transition.
pub fn mark_paid(conn: &Connection, id: &str, now: u64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invoices SET status = 'paid', paid_at = ?2
         WHERE id = ?1 AND status = 'pending' AND expires_at > ?2",
        rusqlite::params![id, now as i64],
    )?;
    Ok(changed == 1)
}

/// `pending -> expired` because the provider says the invoice is dead.
pub fn mark_expired(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invoices SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
        [id],
    )?;
    Ok(changed == 1)
}

/// Retire an unconsumed invoice whose hard expiry has passed.
///
/// Paid-but-unused invoices expire too; `paid_at` stays set so they can be
/// found for manual refunds.
pub fn expire_stale(conn: &Connection, id: &str, now: u64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE invoices SET status = 'expired'
         WHERE id = ?1 AND status IN ('pending', 'paid') AND expires_at <= ?2",
        rusqlite::params![id, now as i64],
    )?;
    Ok(changed == 1)
}

/// Consume a paid invoice. The single compare-and-set that makes payment
/// proofs single-use.
///
/// Succeeds only if the invoice exists, belongs to `device`, was opened for
/// `purpose`/`subject_ref`, is `paid`, and has not passed `expires_at`.
/// Otherwise nothing is written and the reason comes back as
/// [`DbError::Invoice`].
pub fn mark_used(
    conn: &Connection,
    id: &str,
    device: &str,
    purpose: Purpose,
    subject_ref: Option<&str>,
    now: u64,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE invoices SET status = 'used', used_at = ?5
         WHERE id = ?1
           AND device_session_id = ?2
           AND purpose = ?3
           AND subject_ref IS ?4
           AND status = 'paid'
           AND expires_at > ?5",
        rusqlite::params![id, device, purpose.as_str(), subject_ref, now as i64],
    )?;
    if changed == 1 {
        return Ok(());
    }

    let conflict = match find(conn, id)? {
        None => InvoiceConflict::NotFound,
        Some(inv) => diagnose(&inv, device, purpose, subject_ref, now),
    };
    Err(DbError::Invoice(conflict))
}

/// Explain why `invoice` cannot be consumed by `device` for `purpose`.
pub fn diagnose(
    invoice: &Invoice,
    device: &str,
    purpose: Purpose,
    subject_ref: Option<&str>,
    now: u64,
) -> InvoiceConflict {
    if invoice.device_session_id != device {
        InvoiceConflict::WrongOwner
    } else if !invoice.matches(purpose, subject_ref) {
        InvoiceConflict::WrongPurpose
    } else if invoice.status == InvoiceStatus::Used {
        InvoiceConflict::AlreadyUsed
    } else if invoice.status == InvoiceStatus::Expired || invoice.is_expired_at(now) {
        InvoiceConflict::Expired
    } else if invoice.status == InvoiceStatus::Pending {
        InvoiceConflict::NotPaid
    } else {
        InvoiceConflict::AlreadyUsed
    }
}

fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let purpose: String = row.get(1)?;
    let status: String = row.get(7)?;
    let payload: Option<String> = row.get(12)?;

    Ok(Invoice {
        id: row.get(0)?,
        purpose: purpose
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        subject_ref: row.get(2)?,
        device_session_id: row.get(3)?,
        location_id: row.get(4)?,
        amount_sats: to_u64(row.get(5)?),
        payment_request: row.get(6)?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        created_at: to_u64(row.get(8)?),
        expires_at: to_u64(row.get(9)?),
        paid_at: row.get::<_, Option<i64>>(10)?.map(to_u64),
        used_at: row.get::<_, Option<i64>>(11)?.map(to_u64),
        payload: payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
    })
}
