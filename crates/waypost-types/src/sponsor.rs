//! Sponsorship bids and the continuation queue read model.

use serde::{Deserialize, Serialize};

/// Default sponsorship slot length (24 hours).
pub const DEFAULT_SLOT_SECS: u64 = 24 * 60 * 60;

/// A paid claim on a location's sponsorship slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct SponsorBid {
    pub id: String,
    pub location_id: String,
    pub sponsor_label: String,
    pub sponsor_url: Option<String>,
    pub amount_sats: u64,
    pub invoice_id: String,
    pub paid_at: u64,
    pub activates_at: u64,
    pub expires_at: u64,
}

impl SponsorBid {
    /// `activates_at <= now < expires_at`.
    pub fn is_active_at(&self, now: u64) -> bool {
        self.activates_at <= now && now < self.expires_at
    }

    pub fn is_pending_at(&self, now: u64) -> bool {
        self.activates_at > now
    }
}

/// A pending bid annotated with its place in line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct QueuedBid {
    #[serde(flatten)]
    pub bid: SponsorBid,
    /// 1-based.
    pub position: u32,
    pub starts_in_hours: f64,
}

/// Current sponsor plus everyone waiting behind them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct SponsorQueue {
    pub current: Option<SponsorBid>,
    pub pending: Vec<QueuedBid>,
    pub total_in_queue: u32,
}

impl SponsorQueue {
    /// Build the read model from a location's live chain (bids whose window
    /// has not yet closed), sorted by `(activates_at, amount desc, paid_at)`.
    pub fn from_chain(chain: Vec<SponsorBid>, now: u64) -> Self {
        let mut current = None;
        let mut pending = Vec::new();

        for bid in chain {
            if bid.is_active_at(now) && current.is_none() {
                current = Some(bid);
            } else if bid.is_pending_at(now) {
                let position = pending.len() as u32 + 1;
                let starts_in_hours = (bid.activates_at - now) as f64 / 3600.0;
                pending.push(QueuedBid {
                    bid,
                    position,
                    starts_in_hours,
                });
            }
        }

        let total_in_queue = pending.len() as u32;
        Self {
            current,
            pending,
            total_in_queue,
        }
    }
}
