//! Sponsorship auction and continuation queue.
//!
//! Each location has a chain of paid bids. The head is the current sponsor;
//! everything behind it waits its turn. A new bid must beat the highest
//! amount in the live chain by at least one sat and is appended to the tail,
//! activating when the tail's window closes. Nobody is ever pre-empted, and
//! expiry is a pure function of the clock.
//!
//! Bids are checked twice: before the invoice is opened, so a hopeless bid
//! never costs anything, and again at confirmation inside an immediate
//! transaction, since another bid may have been appended in between.

use std::sync::Arc;

use rusqlite::Connection;
use waypost_db::begin_immediate;
use waypost_db::queries::sponsors;
use waypost_types::invoice::{Invoice, InvoiceConflict};
use waypost_types::sponsor::{SponsorBid, SponsorQueue};
use waypost_types::{Presence, Purpose, MAX_SPONSOR_LABEL_CHARS, MAX_SPONSOR_URL_LEN};

use crate::{
    new_id, validate_presence, Clock, GateError, InvoiceLedger, NotEligible, Result, SharedDb,
    SponsorPolicy,
};

/// Sponsorship auction for every location.
#[derive(Clone)]
pub struct SponsorAuction {
    db: SharedDb,
    invoices: InvoiceLedger,
    policy: SponsorPolicy,
    clock: Arc<dyn Clock>,
}

impl SponsorAuction {
    pub fn new(
        db: SharedDb,
        invoices: InvoiceLedger,
        policy: SponsorPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            invoices,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &SponsorPolicy {
        &self.policy
    }

    /// Smallest bid the location would accept right now.
    pub async fn minimum_bid(&self, location: &str) -> Result<u64> {
        let conn = self.db.lock().await;
        let chain = sponsors::live_chain(&conn, location, self.clock.now())?;
        Ok(self.minimum_for(&chain))
    }

    /// `max(base_price, top + 1)` over the current and pending bids.
    pub fn minimum_for(&self, chain: &[SponsorBid]) -> u64 {
        chain
            .iter()
            .map(|bid| bid.amount_sats)
            .max()
            .map_or(self.policy.base_price_sats, |top| {
                self.policy.base_price_sats.max(top.saturating_add(1))
            })
    }

    /// Validate a bid and open its invoice.
    ///
    /// Bids below the minimum are refused before any invoice exists.
    pub async fn open_bid(
        &self,
        presence: &Presence,
        label: &str,
        url: Option<&str>,
        amount_sats: u64,
    ) -> Result<Invoice> {
        validate_presence(presence)?;
        let label = validate_label(label)?;
        let url = url.map(validate_url).transpose()?;

        let minimum_sats = self.minimum_bid(&presence.location_id).await?;
        if amount_sats < minimum_sats {
            tracing::debug!(
                location = %presence.location_id,
                amount_sats,
                minimum_sats,
                "sponsor bid below minimum"
            );
            return Err(NotEligible::BidTooLow { minimum_sats }.into());
        }

        let payload = serde_json::json!({
            "sponsor_label": label,
            "sponsor_url": url,
        });
        self.invoices
            .open_invoice(presence, Purpose::Sponsor, None, amount_sats, Some(payload))
            .await
    }

    /// Turn a paid sponsor invoice into a scheduled bid.
    ///
    /// If a higher bid was committed after this one was opened, the bid is
    /// refused with [`NotEligible::BidTooLow`] and the invoice stays paid and
    /// unconsumed so it can be refunded by hand.
    pub async fn confirm_bid(&self, presence: &Presence, invoice_id: &str) -> Result<SponsorBid> {
        validate_presence(presence)?;
        let invoice = self.invoices.refresh(invoice_id).await?.invoice;
        if invoice.location_id != presence.location_id {
            return Err(GateError::InvoiceConflict(InvoiceConflict::WrongOwner));
        }

        let mut conn = self.db.lock().await;
        let now = self.clock.now();
        let tx = begin_immediate(&mut conn)?;
        let invoice = InvoiceLedger::ensure_consumable(
            &tx,
            invoice_id,
            &presence.device_session_id,
            Purpose::Sponsor,
            None,
            now,
        )?;
        let (label, url) = bid_details(&invoice)?;

        let chain = sponsors::live_chain(&tx, &presence.location_id, now)?;
        let minimum_sats = self.minimum_for(&chain);
        if invoice.amount_sats < minimum_sats {
            tracing::warn!(
                invoice_id,
                location = %presence.location_id,
                amount_sats = invoice.amount_sats,
                minimum_sats,
                "paid sponsor bid outbid before confirmation; invoice left unconsumed for refund"
            );
            return Err(NotEligible::BidTooLow { minimum_sats }.into());
        }

        InvoiceLedger::mark_used(
            &tx,
            invoice_id,
            &presence.device_session_id,
            Purpose::Sponsor,
            None,
            now,
        )?;
        let bid = self.append(&tx, &invoice, &chain, label, url, now)?;
        tx.commit()?;

        tracing::info!(
            invoice_id,
            bid_id = %bid.id,
            location = %bid.location_id,
            amount_sats = bid.amount_sats,
            activates_at = bid.activates_at,
            "sponsor bid accepted"
        );
        Ok(bid)
    }

    /// Current sponsor and waiting bids.
    pub async fn queue(&self, location: &str) -> Result<SponsorQueue> {
        let conn = self.db.lock().await;
        let now = self.clock.now();
        let chain = sponsors::live_chain(&conn, location, now)?;
        Ok(SponsorQueue::from_chain(chain, now))
    }

    /// Every accepted bid at a location, newest first.
    pub async fn history(&self, location: &str, limit: u32) -> Result<Vec<SponsorBid>> {
        let conn = self.db.lock().await;
        Ok(sponsors::history(&conn, location, limit)?)
    }

    fn append(
        &self,
        conn: &Connection,
        invoice: &Invoice,
        chain: &[SponsorBid],
        sponsor_label: String,
        sponsor_url: Option<String>,
        now: u64,
    ) -> Result<SponsorBid> {
        let activates_at = chain.last().map_or(now, |tail| tail.expires_at.max(now));
        let bid = SponsorBid {
            id: new_id(),
            location_id: invoice.location_id.clone(),
            sponsor_label,
            sponsor_url,
            amount_sats: invoice.amount_sats,
            invoice_id: invoice.id.clone(),
            paid_at: invoice.paid_at.unwrap_or(now),
            activates_at,
            expires_at: activates_at + self.policy.slot_duration_secs,
        };
        sponsors::insert(conn, &bid, &invoice.device_session_id)?;
        Ok(bid)
    }
}

fn validate_label(label: &str) -> Result<String> {
    let label = label.trim();
    if label.is_empty() {
        return Err(GateError::Validation("sponsor_label is required".into()));
    }
    if label.chars().count() > MAX_SPONSOR_LABEL_CHARS {
        return Err(GateError::Validation(format!(
            "sponsor_label exceeds {MAX_SPONSOR_LABEL_CHARS} characters"
        )));
    }
    Ok(label.to_string())
}

fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(GateError::Validation(
            "sponsor_url must start with http:// or https://".into(),
        ));
    }
    if url.len() > MAX_SPONSOR_URL_LEN {
        return Err(GateError::Validation(format!(
            "sponsor_url exceeds {MAX_SPONSOR_URL_LEN} bytes"
        )));
    }
    Ok(url.to_string())
}

/// Label and url stored on the invoice when the bid was opened.
fn bid_details(invoice: &Invoice) -> Result<(String, Option<String>)> {
    let payload = invoice
        .payload
        .as_ref()
        .ok_or_else(|| GateError::Validation("sponsor invoice has no bid details".into()))?;
    let label = payload
        .get("sponsor_label")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| GateError::Validation("sponsor invoice has no label".into()))?;
    let url = payload
        .get("sponsor_url")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    Ok((label.to_string(), url))
}
