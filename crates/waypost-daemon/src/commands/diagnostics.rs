//! Diagnostics and event subscription commands.

use std::sync::Arc;

use rand::RngCore;
use serde_json::Value;

use crate::events::EventFilter;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Version, provider, uptime and the active pricing.
pub async fn get_daemon_info(state: &Arc<DaemonState>) -> Result {
    let schema_version: u32 = {
        let conn = state.db.lock().await;
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| RpcError::internal_error(&e.to_string()))?
    };
    let now = state.clock.now();
    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.invoices.provider_name(),
        "schema_version": schema_version,
        "uptime_secs": now.saturating_sub(state.started_at),
        "event_sequence": state.event_bus.sequence(),
        "dev_mode": state.config.advanced.dev_mode,
        "pricing": state.gate.pricing(),
        "sponsorship": state.auction.policy(),
    }))
}

/// Parse an event filter and mint a subscription id.
///
/// The connection handler owns the forwarding task; this only validates.
pub fn subscribe_events(
    params: &Value,
) -> std::result::Result<(EventFilter, Value), RpcError> {
    let filter: EventFilter = match params.get("filter") {
        None | Some(Value::Null) => EventFilter::default(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| RpcError::invalid_params(&format!("filter: {e}")))?,
    };

    let mut id_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id_bytes);
    let subscription_id = hex::encode(id_bytes);

    Ok((filter, serde_json::json!({"subscription_id": subscription_id})))
}
