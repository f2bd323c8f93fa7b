//! Invoice records.

use serde::{Deserialize, Serialize};

use crate::{InvoiceStatus, Purpose};

/// A payment intent tracked by the invoice ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Invoice {
    /// Provider-scoped opaque id.
    pub id: String,
    pub purpose: Purpose,
    /// Pin id for boost/delete invoices.
    pub subject_ref: Option<String>,
    pub device_session_id: String,
    pub location_id: String,
    pub amount_sats: u64,
    /// BOLT11 string (or provider equivalent) shown to the payer.
    pub payment_request: String,
    pub status: InvoiceStatus,
    pub created_at: u64,
    pub expires_at: u64,
    pub paid_at: Option<u64>,
    pub used_at: Option<u64>,
    /// Purpose-specific details, e.g. the sponsor label for sponsor bids.
    #[ts(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Why an invoice could not be consumed. Terminal for that invoice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceConflict {
    #[error("invoice not found")]
    NotFound,
    #[error("invoice belongs to another device")]
    WrongOwner,
    #[error("invoice was opened for a different action")]
    WrongPurpose,
    #[error("invoice has not been paid")]
    NotPaid,
    #[error("invoice has already been used")]
    AlreadyUsed,
    #[error("invoice has expired")]
    Expired,
}

impl Invoice {
    /// Past its hard expiry.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether this invoice was opened for `purpose` on `subject`.
    pub fn matches(&self, purpose: Purpose, subject_ref: Option<&str>) -> bool {
        self.purpose == purpose && self.subject_ref.as_deref() == subject_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invoice {
        Invoice {
            id: "inv-1".into(),
            purpose: Purpose::Delete,
            subject_ref: Some("pin-1".into()),
            device_session_id: "dev".into(),
            location_id: "loc".into(),
            amount_sats: 5,
            payment_request: "lnsim1abc".into(),
            status: InvoiceStatus::Pending,
            created_at: 100,
            expires_at: 1000,
            paid_at: None,
            used_at: None,
            payload: None,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let inv = sample();
        assert!(!inv.is_expired_at(999));
        assert!(inv.is_expired_at(1000));
    }

    #[test]
    fn test_matches_purpose_and_subject() {
        let inv = sample();
        assert!(inv.matches(Purpose::Delete, Some("pin-1")));
        assert!(!inv.matches(Purpose::Delete, Some("pin-2")));
        assert!(!inv.matches(Purpose::Boost, Some("pin-1")));
        assert!(!inv.matches(Purpose::Delete, None));
    }
}
