//! # waypost-types
//!
//! Shared domain types used across the Waypost workspace.
//!
//! Identifiers are opaque strings handed to us by upstream collaborators
//! (the presence verifier issues device sessions and location ids, payment
//! providers issue invoice ids). Amounts are always integer satoshis and all
//! timestamps are Unix epoch seconds.

pub mod invoice;
pub mod pin;
pub mod sponsor;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Common type aliases.
pub type DeviceSessionId = String;
pub type LocationId = String;
pub type InvoiceId = String;
pub type PinId = String;
pub type Sats = u64;

/// Length of a calendar day in seconds. Quota days are UTC day numbers.
pub const DAY_SECS: u64 = 86_400;

/// Maximum pin body length in characters.
pub const MAX_BODY_CHARS: usize = 500;

/// Maximum sponsor label length in characters.
pub const MAX_SPONSOR_LABEL_CHARS: usize = 64;

/// Maximum sponsor URL length in bytes.
pub const MAX_SPONSOR_URL_LEN: usize = 256;

/// UTC calendar day number for a timestamp.
pub fn day_of(timestamp: u64) -> u64 {
    timestamp / DAY_SECS
}

/// Error returned when parsing a stored enum discriminant fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// A validated presence pair.
///
/// Produced by the presence verifier after geofence and expiry checks; the
/// metering core never sees the raw token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Presence {
    pub device_session_id: DeviceSessionId,
    pub location_id: LocationId,
}

impl Presence {
    pub fn new(device_session_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            device_session_id: device_session_id.into(),
            location_id: location_id.into(),
        }
    }
}

/// What an invoice pays for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Purpose {
    Post,
    Boost,
    Delete,
    Sponsor,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Post => "post",
            Purpose::Boost => "boost",
            Purpose::Delete => "delete",
            Purpose::Sponsor => "sponsor",
        }
    }

    /// Whether invoices for this purpose are bound to a specific pin.
    pub fn requires_subject(&self) -> bool {
        matches!(self, Purpose::Boost | Purpose::Delete)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Purpose::Post),
            "boost" => Ok(Purpose::Boost),
            "delete" => Ok(Purpose::Delete),
            "sponsor" => Ok(Purpose::Sponsor),
            other => Err(ParseEnumError {
                kind: "purpose",
                value: other.to_string(),
            }),
        }
    }
}

/// Ledger status of an invoice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Used,
    Expired,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Used => "used",
            InvoiceStatus::Expired => "expired",
        }
    }

    /// Used and expired invoices never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Used | InvoiceStatus::Expired)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "used" => Ok(InvoiceStatus::Used),
            "expired" => Ok(InvoiceStatus::Expired),
            other => Err(ParseEnumError {
                kind: "invoice status",
                value: other.to_string(),
            }),
        }
    }
}

/// Free-tier standing of a device at a location for one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct QuotaStatus {
    pub day: u64,
    pub free_used: u32,
    pub paid_used: u32,
    pub free_limit: u32,
    pub free_remaining: u32,
    pub requires_payment: bool,
}
