//! Invoice ledger.
//!
//! Wraps the invoice table with the payment provider: opening an invoice
//! creates it at the provider first and records it only if that worked;
//! refreshing a pending invoice asks the provider and applies the answer with
//! a compare-and-set. Consumption ([`InvoiceLedger::mark_used`]) is a plain
//! synchronous call so the gate can run it inside its own transaction.

use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use waypost_db::queries::invoices;
use waypost_lightning::{PaymentProvider, ProviderError, ProviderStatus};
use waypost_types::invoice::{Invoice, InvoiceConflict};
use waypost_types::{InvoiceStatus, Presence, Purpose};

use crate::{validate_presence, Clock, GateError, Result, SharedDb};

/// An invoice after a provider round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    pub invoice: Invoice,
    /// Whether this call moved the invoice from pending to paid.
    pub became_paid: bool,
}

impl Refreshed {
    fn unchanged(invoice: Invoice) -> Self {
        Self {
            invoice,
            became_paid: false,
        }
    }
}

/// Invoice ledger bound to one payment provider.
#[derive(Clone)]
pub struct InvoiceLedger {
    db: SharedDb,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
}

impl InvoiceLedger {
    pub fn new(
        db: SharedDb,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            db,
            provider,
            clock,
            ttl_secs,
        }
    }

    /// Name of the backing provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Open an invoice at the provider and record it as pending.
    ///
    /// A provider failure leaves no row behind.
    pub async fn open_invoice(
        &self,
        presence: &Presence,
        purpose: Purpose,
        subject_ref: Option<String>,
        amount_sats: u64,
        payload: Option<Value>,
    ) -> Result<Invoice> {
        validate_presence(presence)?;
        if purpose.requires_subject() != subject_ref.is_some() {
            return Err(GateError::Validation(format!(
                "{purpose} invoices {} a subject pin",
                if purpose.requires_subject() { "need" } else { "take no" }
            )));
        }

        let memo = format!("waypost {purpose} at {}", presence.location_id);
        let created = self
            .provider
            .create_invoice(amount_sats, &memo, self.ttl_secs)
            .await?;

        let now = self.clock.now();
        let invoice = Invoice {
            id: created.invoice_id,
            purpose,
            subject_ref,
            device_session_id: presence.device_session_id.clone(),
            location_id: presence.location_id.clone(),
            amount_sats,
            payment_request: created.payment_request,
            status: InvoiceStatus::Pending,
            created_at: now,
            // Our own TTL is the hard limit even if the provider would wait longer.
            expires_at: created.expires_at.min(now + self.ttl_secs),
            paid_at: None,
            used_at: None,
            payload,
        };

        let conn = self.db.lock().await;
        Self::record(&conn, &invoice)?;
        tracing::info!(
            invoice_id = %invoice.id,
            purpose = %purpose,
            amount_sats,
            location = %presence.location_id,
            "invoice opened"
        );
        Ok(invoice)
    }

    /// Persist a pending invoice.
    pub fn record(conn: &Connection, invoice: &Invoice) -> Result<()> {
        invoices::insert(conn, invoice)?;
        Ok(())
    }

    /// Current state of an invoice, without contacting the provider.
    pub async fn lookup(&self, invoice_id: &str) -> Result<Invoice> {
        let conn = self.db.lock().await;
        Self::lookup_in(&conn, invoice_id, self.clock.now())
    }

    /// Read an invoice, retiring it first if its hard expiry has passed.
    pub fn lookup_in(conn: &Connection, invoice_id: &str, now: u64) -> Result<Invoice> {
        let invoice = invoices::find(conn, invoice_id)?
            .ok_or(GateError::InvoiceConflict(InvoiceConflict::NotFound))?;
        if !invoice.status.is_terminal() && invoice.is_expired_at(now) {
            if invoices::expire_stale(conn, invoice_id, now)? {
                tracing::debug!(invoice_id, "invoice expired");
            }
            return Ok(invoices::get(conn, invoice_id)?);
        }
        Ok(invoice)
    }

    /// Ask the provider about a pending invoice and record the answer.
    ///
    /// Invoices that are not pending are returned as stored. An unreachable
    /// provider is an error: a pending invoice is never treated as paid.
    pub async fn refresh(&self, invoice_id: &str) -> Result<Refreshed> {
        let invoice = self.lookup(invoice_id).await?;
        if invoice.status != InvoiceStatus::Pending {
            return Ok(Refreshed::unchanged(invoice));
        }

        let status = match self.provider.check_status(invoice_id).await {
            Ok(status) => status,
            Err(ProviderError::UnknownInvoice(_)) => {
                tracing::warn!(
                    invoice_id,
                    provider = self.provider.name(),
                    "provider does not know invoice"
                );
                return Ok(Refreshed::unchanged(invoice));
            }
            Err(e) => return Err(e.into()),
        };
        self.apply_status(invoice_id, status).await
    }

    /// Apply a status change pushed by the provider.
    pub async fn apply_webhook(&self, payload: &Value) -> Result<Refreshed> {
        let event = self
            .provider
            .parse_webhook(payload)
            .ok_or_else(|| GateError::Validation("unrecognised webhook payload".into()))?;
        tracing::debug!(invoice_id = %event.invoice_id, status = ?event.status, "payment webhook");
        self.apply_status(&event.invoice_id, event.status).await
    }

    /// Settle an invoice at a development provider, then pick up the result.
    pub async fn dev_mark_paid(&self, invoice_id: &str) -> Result<Refreshed> {
        let invoice = self.lookup(invoice_id).await?;
        match invoice.status {
            InvoiceStatus::Pending => {}
            InvoiceStatus::Expired => {
                return Err(GateError::InvoiceConflict(InvoiceConflict::Expired))
            }
            InvoiceStatus::Paid | InvoiceStatus::Used => return Ok(Refreshed::unchanged(invoice)),
        }
        match self.provider.mark_paid(invoice_id).await {
            Ok(()) => {}
            Err(ProviderError::Rejected(reason)) => return Err(GateError::Validation(reason)),
            Err(e) => return Err(e.into()),
        }
        self.refresh(invoice_id).await
    }

    async fn apply_status(&self, invoice_id: &str, status: ProviderStatus) -> Result<Refreshed> {
        let conn = self.db.lock().await;
        let now = self.clock.now();
        // Unknown ids are rejected before any write.
        let before = Self::lookup_in(&conn, invoice_id, now)?;

        let became_paid = match status {
            ProviderStatus::Paid if before.status == InvoiceStatus::Pending => {
                let won = invoices::mark_paid(&conn, invoice_id, now)?;
                if won {
                    tracing::info!(invoice_id, amount_sats = before.amount_sats, "invoice paid");
                }
                won
            }
            ProviderStatus::Expired if before.status == InvoiceStatus::Pending => {
                invoices::mark_expired(&conn, invoice_id)?;
                false
            }
            _ => false,
        };

        let invoice = Self::lookup_in(&conn, invoice_id, now)?;
        Ok(Refreshed {
            invoice,
            became_paid,
        })
    }

    /// Fail unless `device` could consume the invoice for `purpose` right now.
    ///
    /// Runs inside the caller's transaction ahead of other checks that would
    /// otherwise mask the real reason an invoice is unusable.
    pub fn ensure_consumable(
        conn: &Connection,
        invoice_id: &str,
        device: &str,
        purpose: Purpose,
        subject_ref: Option<&str>,
        now: u64,
    ) -> Result<Invoice> {
        let invoice = invoices::find(conn, invoice_id)?
            .ok_or(GateError::InvoiceConflict(InvoiceConflict::NotFound))?;
        let consumable = invoice.device_session_id == device
            && invoice.matches(purpose, subject_ref)
            && invoice.status == InvoiceStatus::Paid
            && !invoice.is_expired_at(now);
        if !consumable {
            return Err(GateError::InvoiceConflict(invoices::diagnose(
                &invoice,
                device,
                purpose,
                subject_ref,
                now,
            )));
        }
        Ok(invoice)
    }

    /// Consume a paid invoice exactly once.
    pub fn mark_used(
        conn: &Connection,
        invoice_id: &str,
        device: &str,
        purpose: Purpose,
        subject_ref: Option<&str>,
        now: u64,
    ) -> Result<()> {
        invoices::mark_used(conn, invoice_id, device, purpose, subject_ref, now)?;
        Ok(())
    }
}
