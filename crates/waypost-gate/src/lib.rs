//! # waypost-gate
//!
//! The metering core: decides for every location-bound write whether it is
//! free, blocked, or needs a paid invoice, and runs the sponsorship auction.
//!
//! ## Modules
//!
//! - [`clock`]: injectable time source
//! - [`pricing`]: prices, windows and limits
//! - [`invoices`]: invoice ledger with provider refresh and single-use consumption
//! - [`quota`]: per device/location/day quota and posting cooldown
//! - [`gate`]: post, reply, boost and delete through one decision procedure
//! - [`sponsor`]: sponsorship auction and continuation queue
//!
//! All ledger state lives in SQLite behind a shared connection. Provider
//! calls are made with the connection released; every read-then-write runs
//! in an immediate transaction.

pub mod clock;
pub mod gate;
pub mod invoices;
pub mod pricing;
pub mod quota;
pub mod sponsor;

use std::sync::Arc;

use rand::RngCore;
use rusqlite::Connection;
use waypost_db::DbError;
use waypost_lightning::ProviderError;
use waypost_types::invoice::InvoiceConflict;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{ActionGate, Applied, GateOutcome, PaymentRequired};
pub use invoices::{InvoiceLedger, Refreshed};
pub use pricing::{PricingPolicy, SponsorPolicy};
pub use quota::QuotaLedger;
pub use sponsor::SponsorAuction;

/// The ledger database handle shared by every component.
pub type SharedDb = Arc<tokio::sync::Mutex<Connection>>;

/// Why an otherwise well-formed action is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotEligible {
    #[error("please wait {remaining_secs} seconds")]
    CooldownActive { remaining_secs: u64 },

    #[error("bid must be at least {minimum_sats} sats")]
    BidTooLow { minimum_sats: u64 },

    #[error("only the author can delete this pin")]
    NotOwner,

    #[error("pin not found at this location")]
    PinNotFound,

    #[error("pin has been deleted")]
    PinDeleted,
}

/// Gate errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not eligible: {0}")]
    NotEligible(NotEligible),

    #[error("invalid or unpaid invoice: {0}")]
    InvoiceConflict(InvoiceConflict),

    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("database error: {0}")]
    Db(DbError),
}

impl From<DbError> for GateError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Invoice(conflict) => GateError::InvoiceConflict(conflict),
            other => GateError::Db(other),
        }
    }
}

impl From<rusqlite::Error> for GateError {
    fn from(e: rusqlite::Error) -> Self {
        GateError::Db(DbError::Sqlite(e))
    }
}

impl From<NotEligible> for GateError {
    fn from(reason: NotEligible) -> Self {
        GateError::NotEligible(reason)
    }
}

impl From<ProviderError> for GateError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidAmount(_) | ProviderError::Unsupported { .. } => {
                GateError::Validation(e.to_string())
            }
            ProviderError::UnknownInvoice(_) => {
                GateError::InvoiceConflict(InvoiceConflict::NotFound)
            }
            ProviderError::Unavailable(_)
            | ProviderError::Misconfigured(_)
            | ProviderError::Rejected(_)
            | ProviderError::BadResponse(_) => GateError::ProviderUnavailable(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;

/// Random 128-bit hex id for pins and bids.
pub(crate) fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reject presence pairs with blank halves.
pub(crate) fn validate_presence(presence: &waypost_types::Presence) -> Result<()> {
    if presence.device_session_id.trim().is_empty() || presence.location_id.trim().is_empty() {
        return Err(GateError::Validation(
            "device_session_id and location_id are required".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use waypost_lightning::simulated::SimulatedProvider;
    use waypost_lightning::PaymentProvider;

    use super::*;

    pub const T0: u64 = 1_700_000_000;

    pub struct Harness {
        pub db: SharedDb,
        pub clock: Arc<ManualClock>,
        pub provider: Arc<SimulatedProvider>,
        pub invoices: InvoiceLedger,
    }

    pub fn harness() -> Harness {
        let db: SharedDb = Arc::new(tokio::sync::Mutex::new(
            waypost_db::open_memory().expect("open test db"),
        ));
        let clock = Arc::new(ManualClock::new(T0));
        let provider = Arc::new(SimulatedProvider::new());
        let invoices = InvoiceLedger::new(
            db.clone(),
            provider.clone() as Arc<dyn PaymentProvider>,
            clock.clone(),
            PricingPolicy::default().invoice_ttl_secs,
        );
        Harness {
            db,
            clock,
            provider,
            invoices,
        }
    }
}
