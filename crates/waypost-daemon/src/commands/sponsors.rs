//! Sponsorship commands.

use std::sync::Arc;

use serde_json::Value;

use super::{opt_str_param, presence, str_param};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

/// Smallest bid the location accepts right now.
pub async fn get_sponsor_minimum(state: &Arc<DaemonState>, params: &Value) -> Result {
    let location_id = str_param(params, "location_id")?;
    let minimum_sats = state.auction.minimum_bid(location_id).await?;
    Ok(serde_json::json!({
        "location_id": location_id,
        "minimum_sats": minimum_sats,
        "base_price_sats": state.auction.policy().base_price_sats,
        "slot_duration_secs": state.auction.policy().slot_duration_secs,
    }))
}

/// Place a bid: validates it and opens the sponsor invoice.
pub async fn open_sponsor_bid(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let label = str_param(params, "sponsor_label")?;
    let url = opt_str_param(params, "sponsor_url")?;
    let amount_sats = params
        .get("amount_sats")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("amount_sats required"))?;

    let invoice = state
        .auction
        .open_bid(&presence, label, url, amount_sats)
        .await?;
    super::invoices::emit_opened(state, &invoice);
    serde_json::to_value(&invoice).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Schedule a paid bid at the tail of the location's queue.
pub async fn confirm_sponsor_bid(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let invoice_id = str_param(params, "invoice_id")?;
    let bid = state.auction.confirm_bid(&presence, invoice_id).await?;

    state.emit(
        "SponsorBidAccepted",
        serde_json::json!({
            "location_id": bid.location_id,
            "bid_id": bid.id,
            "sponsor_label": bid.sponsor_label,
            "amount_sats": bid.amount_sats,
            "activates_at": bid.activates_at,
            "expires_at": bid.expires_at,
        }),
    );
    serde_json::to_value(&bid).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Current sponsor and the waiting queue.
pub async fn get_sponsor_queue(state: &Arc<DaemonState>, params: &Value) -> Result {
    let location_id = str_param(params, "location_id")?;
    let queue = state.auction.queue(location_id).await?;
    serde_json::to_value(&queue).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Accepted bids at a location, newest first.
pub async fn get_sponsor_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let location_id = str_param(params, "location_id")?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map_or(DEFAULT_HISTORY_LIMIT, |l| l.min(u64::from(MAX_HISTORY_LIMIT)) as u32);
    let bids = state.auction.history(location_id, limit).await?;
    Ok(serde_json::json!({
        "location_id": location_id,
        "bids": bids,
    }))
}
