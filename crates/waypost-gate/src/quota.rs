//! Quota and cooldown ledger.
//!
//! Quota counters are keyed by `(device, location, day)`, so a new day starts
//! at zero without any reset job. The cooldown is derived from the device's
//! latest top-level pin and is independent of quota and payment.

use rusqlite::Connection;
use waypost_db::queries::{pins, quota};
use waypost_types::{Presence, QuotaStatus};

use crate::{PricingPolicy, Result};

/// Free-tier limits for pin actions.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLedger {
    free_limit: u32,
    cooldown_secs: u64,
}

impl QuotaLedger {
    pub fn new(free_limit: u32, cooldown_secs: u64) -> Self {
        Self {
            free_limit,
            cooldown_secs,
        }
    }

    pub fn from_policy(policy: &PricingPolicy) -> Self {
        Self::new(policy.free_posts_per_day, policy.post_cooldown_secs)
    }

    pub fn free_limit(&self) -> u32 {
        self.free_limit
    }

    /// Seconds until the device may post another top-level pin here.
    /// Zero when no cooldown is running.
    pub fn check_cooldown(&self, conn: &Connection, presence: &Presence, now: u64) -> Result<u64> {
        let last =
            pins::last_top_level_at(conn, &presence.device_session_id, &presence.location_id)?;
        Ok(last.map_or(0, |at| (at + self.cooldown_secs).saturating_sub(now)))
    }

    /// Free-tier standing for `day`.
    pub fn check_quota(
        &self,
        conn: &Connection,
        presence: &Presence,
        day: u64,
    ) -> Result<QuotaStatus> {
        let usage = quota::usage(conn, &presence.device_session_id, &presence.location_id, day)?;
        let free_remaining = self.free_limit.saturating_sub(usage.free_actions_used);
        Ok(QuotaStatus {
            day,
            free_used: usage.free_actions_used,
            paid_used: usage.paid_actions_used,
            free_limit: self.free_limit,
            free_remaining,
            requires_payment: free_remaining == 0,
        })
    }

    /// Take one free action. `false` means the day's allowance is gone,
    /// possibly to a concurrent request, and the caller must charge.
    pub fn record_free_use(
        &self,
        conn: &Connection,
        presence: &Presence,
        day: u64,
    ) -> Result<bool> {
        Ok(quota::record_free_use(
            conn,
            &presence.device_session_id,
            &presence.location_id,
            day,
            self.free_limit,
        )?)
    }

    pub fn record_paid_use(&self, conn: &Connection, presence: &Presence, day: u64) -> Result<()> {
        quota::record_paid_use(conn, &presence.device_session_id, &presence.location_id, day)?;
        Ok(())
    }
}
