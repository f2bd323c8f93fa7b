//! Pin action commands: post, reply, boost, delete and quota status.

use std::sync::Arc;

use serde_json::Value;
use waypost_gate::{Applied, GateOutcome};
use waypost_types::pin::EffectResult;
use waypost_types::Presence;

use super::{opt_str_param, presence, str_param};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Create a top-level pin.
pub async fn create_post(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let body = str_param(params, "body")?;
    let invoice_id = opt_str_param(params, "invoice_id")?;
    let outcome = state.gate.create_post(&presence, body, invoice_id).await?;
    finish(state, &presence, outcome)
}

/// Reply to an existing pin.
pub async fn create_reply(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let parent_id = str_param(params, "parent_id")?;
    let body = str_param(params, "body")?;
    let invoice_id = opt_str_param(params, "invoice_id")?;
    let outcome = state
        .gate
        .create_reply(&presence, parent_id, body, invoice_id)
        .await?;
    finish(state, &presence, outcome)
}

/// Boost a pin.
pub async fn boost_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let pin_id = str_param(params, "pin_id")?;
    let invoice_id = opt_str_param(params, "invoice_id")?;
    let outcome = state.gate.boost_pin(&presence, pin_id, invoice_id).await?;
    finish(state, &presence, outcome)
}

/// Delete one of the caller's pins.
pub async fn delete_pin(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let pin_id = str_param(params, "pin_id")?;
    let invoice_id = opt_str_param(params, "invoice_id")?;
    let outcome = state.gate.delete_pin(&presence, pin_id, invoice_id).await?;
    finish(state, &presence, outcome)
}

/// Today's free-tier standing and cooldown at a location.
pub async fn get_quota_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let (status, cooldown_remaining_secs) = state.gate.quota_status(&presence).await?;
    let mut value = serde_json::to_value(&status)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    value["cooldown_remaining_secs"] = cooldown_remaining_secs.into();
    Ok(value)
}

/// Turn a gate outcome into the RPC result, emitting the matching event.
fn finish(state: &DaemonState, presence: &Presence, outcome: GateOutcome) -> Result {
    match outcome {
        GateOutcome::Applied(applied) => {
            emit_effect(state, presence, &applied);
            let mut result = serde_json::json!({ "effect_result": applied.effect });
            if let Some(remaining) = applied.remaining_free_actions {
                result["remaining_free_actions"] = remaining.into();
            }
            if let Some(invoice_id) = applied.invoice_id {
                result["invoice_id"] = invoice_id.into();
            }
            Ok(result)
        }
        GateOutcome::PaymentRequired(required) => Err(RpcError::payment_required(&required)),
    }
}

fn emit_effect(state: &DaemonState, presence: &Presence, applied: &Applied) {
    let paid = applied.invoice_id.is_some();
    let (event_type, payload) = match &applied.effect {
        EffectResult::Created { pin_id } => (
            "PinCreated",
            serde_json::json!({
                "location_id": presence.location_id,
                "pin_id": pin_id,
                "paid": paid,
            }),
        ),
        EffectResult::Boosted {
            pin_id,
            boosted_until,
        } => (
            "PinBoosted",
            serde_json::json!({
                "location_id": presence.location_id,
                "pin_id": pin_id,
                "boosted_until": boosted_until,
            }),
        ),
        EffectResult::Deleted { pin_id } => (
            "PinDeleted",
            serde_json::json!({
                "location_id": presence.location_id,
                "pin_id": pin_id,
                "paid": paid,
            }),
        ),
    };
    state.emit(event_type, payload);
}
