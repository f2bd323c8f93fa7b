//! Prices, limits and windows.
//!
//! Both policies deserialize straight from the daemon's `[pricing]` and
//! `[sponsorship]` config tables.

use serde::{Deserialize, Serialize};
use waypost_types::sponsor::DEFAULT_SLOT_SECS;
use waypost_types::Purpose;

/// Metering policy for pin actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Free posts and replies per device, location and day.
    #[serde(default = "default_free_posts_per_day")]
    pub free_posts_per_day: u32,
    #[serde(default = "default_post_price_sats")]
    pub post_price_sats: u64,
    #[serde(default = "default_boost_price_sats")]
    pub boost_price_sats: u64,
    /// How long one paid boost keeps a pin on top.
    #[serde(default = "default_boost_duration_secs")]
    pub boost_duration_secs: u64,
    #[serde(default = "default_delete_price_sats")]
    pub delete_price_sats: u64,
    /// Pins younger than this delete for free.
    #[serde(default = "default_free_delete_window_secs")]
    pub free_delete_window_secs: u64,
    /// Minimum gap between top-level posts by one device at one location.
    #[serde(default = "default_post_cooldown_secs")]
    pub post_cooldown_secs: u64,
    /// Hard expiry applied to every invoice.
    #[serde(default = "default_invoice_ttl_secs")]
    pub invoice_ttl_secs: u64,
}

fn default_free_posts_per_day() -> u32 {
    3
}

fn default_post_price_sats() -> u64 {
    5
}

fn default_boost_price_sats() -> u64 {
    10
}

fn default_boost_duration_secs() -> u64 {
    6 * 60 * 60
}

fn default_delete_price_sats() -> u64 {
    5
}

fn default_free_delete_window_secs() -> u64 {
    10 * 60
}

fn default_post_cooldown_secs() -> u64 {
    60
}

fn default_invoice_ttl_secs() -> u64 {
    15 * 60
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            free_posts_per_day: default_free_posts_per_day(),
            post_price_sats: default_post_price_sats(),
            boost_price_sats: default_boost_price_sats(),
            boost_duration_secs: default_boost_duration_secs(),
            delete_price_sats: default_delete_price_sats(),
            free_delete_window_secs: default_free_delete_window_secs(),
            post_cooldown_secs: default_post_cooldown_secs(),
            invoice_ttl_secs: default_invoice_ttl_secs(),
        }
    }
}

impl PricingPolicy {
    /// Fixed price for a purpose. Sponsor bids name their own amount.
    pub fn price_for(&self, purpose: Purpose) -> Option<u64> {
        match purpose {
            Purpose::Post => Some(self.post_price_sats),
            Purpose::Boost => Some(self.boost_price_sats),
            Purpose::Delete => Some(self.delete_price_sats),
            Purpose::Sponsor => None,
        }
    }

    /// Check the policy is usable. Prices must be whole positive sats since
    /// no provider can open a zero-amount invoice.
    pub fn validate(&self) -> Result<(), String> {
        for (name, price) in [
            ("post_price_sats", self.post_price_sats),
            ("boost_price_sats", self.boost_price_sats),
            ("delete_price_sats", self.delete_price_sats),
        ] {
            if price == 0 {
                return Err(format!("pricing.{name} must be greater than 0"));
            }
        }
        if self.invoice_ttl_secs == 0 {
            return Err("pricing.invoice_ttl_secs must be greater than 0".into());
        }
        if self.boost_duration_secs == 0 {
            return Err("pricing.boost_duration_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// Sponsorship auction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorPolicy {
    /// Floor for any bid, including the first one at a location.
    #[serde(default = "default_base_price_sats")]
    pub base_price_sats: u64,
    /// Length of one sponsorship window.
    #[serde(default = "default_slot_duration_secs")]
    pub slot_duration_secs: u64,
}

fn default_base_price_sats() -> u64 {
    10
}

fn default_slot_duration_secs() -> u64 {
    DEFAULT_SLOT_SECS
}

impl Default for SponsorPolicy {
    fn default() -> Self {
        Self {
            base_price_sats: default_base_price_sats(),
            slot_duration_secs: default_slot_duration_secs(),
        }
    }
}

impl SponsorPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_price_sats == 0 {
            return Err("sponsorship.base_price_sats must be greater than 0".into());
        }
        if self.slot_duration_secs == 0 {
            return Err("sponsorship.slot_duration_secs must be greater than 0".into());
        }
        Ok(())
    }
}
