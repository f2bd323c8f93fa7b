//! In-memory backend for development and tests.
//!
//! Invoices are never paid on their own; [`mark_paid`](PaymentProvider::mark_paid)
//! settles them. Ids are the BLAKE3 hash of a random preimage, mirroring how
//! real payment hashes commit to a preimage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;

use crate::{
    unix_now, validate_amount, CreatedInvoice, PaymentProvider, ProviderError, ProviderStatus,
    Result,
};

#[derive(Debug, Clone)]
struct SimInvoice {
    amount_sats: u64,
    expires_at: u64,
    paid: bool,
}

/// A backend that lives entirely in process memory.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    invoices: Mutex<HashMap<String, SimInvoice>>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invoices ever created.
    pub fn invoice_count(&self) -> usize {
        self.invoices.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn ledger(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SimInvoice>>> {
        self.invoices
            .lock()
            .map_err(|_| ProviderError::Unavailable("simulated ledger poisoned".into()))
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        validate_amount(amount_sats)?;

        let mut preimage = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut preimage);
        let invoice_id = hex::encode(blake3::hash(&preimage).as_bytes());
        let expires_at = unix_now() + expiry_secs;

        self.ledger()?.insert(
            invoice_id.clone(),
            SimInvoice {
                amount_sats,
                expires_at,
                paid: false,
            },
        );
        tracing::debug!(invoice_id = %invoice_id, amount_sats, memo, "simulated invoice created");

        Ok(CreatedInvoice {
            payment_request: format!("lnsim{amount_sats}n1{}", &invoice_id[..40]),
            invoice_id,
            expires_at,
        })
    }

    async fn check_status(&self, invoice_id: &str) -> Result<ProviderStatus> {
        let ledger = self.ledger()?;
        let invoice = ledger
            .get(invoice_id)
            .ok_or_else(|| ProviderError::UnknownInvoice(invoice_id.to_string()))?;
        Ok(if invoice.paid {
            ProviderStatus::Paid
        } else if unix_now() >= invoice.expires_at {
            ProviderStatus::Expired
        } else {
            ProviderStatus::Pending
        })
    }

    async fn mark_paid(&self, invoice_id: &str) -> Result<()> {
        let mut ledger = self.ledger()?;
        let invoice = ledger
            .get_mut(invoice_id)
            .ok_or_else(|| ProviderError::UnknownInvoice(invoice_id.to_string()))?;
        if !invoice.paid && unix_now() >= invoice.expires_at {
            return Err(ProviderError::Rejected("invoice expired".into()));
        }
        invoice.paid = true;
        tracing::warn!(
            invoice_id,
            amount_sats = invoice.amount_sats,
            "simulated invoice marked paid (dev only)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_pay() {
        let provider = SimulatedProvider::new();
        let inv = provider.create_invoice(21, "post", 900).await.expect("create");
        assert_eq!(inv.invoice_id.len(), 64);
        assert!(inv.payment_request.starts_with("lnsim21n1"));
        assert_eq!(
            provider.check_status(&inv.invoice_id).await.expect("status"),
            ProviderStatus::Pending
        );

        provider.mark_paid(&inv.invoice_id).await.expect("mark paid");
        assert_eq!(
            provider.check_status(&inv.invoice_id).await.expect("status"),
            ProviderStatus::Paid
        );
        // Idempotent.
        provider.mark_paid(&inv.invoice_id).await.expect("mark paid again");
        assert_eq!(
            provider.check_status(&inv.invoice_id).await.expect("status"),
            ProviderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let provider = SimulatedProvider::new();
        assert!(matches!(
            provider.create_invoice(0, "post", 900).await,
            Err(ProviderError::InvalidAmount(0))
        ));
        assert_eq!(provider.invoice_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_expiry_is_expired() {
        let provider = SimulatedProvider::new();
        let inv = provider.create_invoice(5, "post", 0).await.expect("create");
        assert_eq!(
            provider.check_status(&inv.invoice_id).await.expect("status"),
            ProviderStatus::Expired
        );
        assert!(provider.mark_paid(&inv.invoice_id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_invoice() {
        let provider = SimulatedProvider::new();
        assert!(matches!(
            provider.check_status("nope").await,
            Err(ProviderError::UnknownInvoice(_))
        ));
    }

    #[tokio::test]
    async fn test_ids_unique() {
        let provider = SimulatedProvider::new();
        let a = provider.create_invoice(5, "a", 900).await.expect("a");
        let b = provider.create_invoice(5, "b", 900).await.expect("b");
        assert_ne!(a.invoice_id, b.invoice_id);
        assert_eq!(provider.invoice_count(), 2);
    }
}
