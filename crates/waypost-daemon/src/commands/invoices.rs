//! Invoice commands.

use std::sync::Arc;

use serde_json::Value;
use waypost_gate::Refreshed;
use waypost_types::invoice::{Invoice, InvoiceConflict};
use waypost_types::Purpose;

use super::{opt_str_param, presence, str_param};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Open an invoice for a post, boost or delete.
pub async fn create_invoice(state: &Arc<DaemonState>, params: &Value) -> Result {
    let presence = presence(params)?;
    let purpose: Purpose = str_param(params, "purpose")?
        .parse()
        .map_err(|e: waypost_types::ParseEnumError| RpcError::invalid_params(&e.to_string()))?;
    let subject_ref = opt_str_param(params, "subject_ref")?;

    let invoice = state
        .gate
        .request_invoice(&presence, purpose, subject_ref)
        .await?;
    emit_opened(state, &invoice);
    invoice_json(&invoice)
}

/// Read an invoice as the ledger has it. Only the device that opened it may.
pub async fn get_invoice(state: &Arc<DaemonState>, params: &Value) -> Result {
    let invoice_id = str_param(params, "invoice_id")?;
    let device = str_param(params, "device_session_id")?;
    let invoice = state.invoices.lookup(invoice_id).await?;
    check_owner(device, &invoice)?;
    invoice_json(&invoice)
}

/// Ask the provider whether an invoice has been paid.
pub async fn check_invoice(state: &Arc<DaemonState>, params: &Value) -> Result {
    let invoice_id = str_param(params, "invoice_id")?;
    let device = str_param(params, "device_session_id")?;
    let current = state.invoices.lookup(invoice_id).await?;
    check_owner(device, &current)?;
    let refreshed = state.invoices.refresh(invoice_id).await?;
    emit_paid(state, &refreshed);
    invoice_json(&refreshed.invoice)
}

/// Apply a payment notification pushed by the provider.
pub async fn apply_payment_webhook(state: &Arc<DaemonState>, params: &Value) -> Result {
    let payload = params
        .get("payload")
        .ok_or_else(|| RpcError::invalid_params("payload required"))?;
    let refreshed = state.invoices.apply_webhook(payload).await?;
    emit_paid(state, &refreshed);
    Ok(serde_json::json!({
        "invoice_id": refreshed.invoice.id,
        "status": refreshed.invoice.status,
        "became_paid": refreshed.became_paid,
    }))
}

/// Settle an invoice without real money. Dev mode only.
pub async fn dev_mark_invoice_paid(state: &Arc<DaemonState>, params: &Value) -> Result {
    if !state.config.advanced.dev_mode {
        return Err(RpcError::dev_mode_disabled());
    }
    let invoice_id = str_param(params, "invoice_id")?;
    let refreshed = state.invoices.dev_mark_paid(invoice_id).await?;
    emit_paid(state, &refreshed);
    invoice_json(&refreshed.invoice)
}

fn check_owner(device: &str, invoice: &Invoice) -> std::result::Result<(), RpcError> {
    if device != invoice.device_session_id {
        return Err(RpcError::invoice_invalid(InvoiceConflict::WrongOwner));
    }
    Ok(())
}

fn invoice_json(invoice: &Invoice) -> Result {
    serde_json::to_value(invoice).map_err(|e| RpcError::internal_error(&e.to_string()))
}

pub(super) fn emit_opened(state: &DaemonState, invoice: &Invoice) {
    state.emit(
        "InvoiceOpened",
        serde_json::json!({
            "location_id": invoice.location_id,
            "invoice_id": invoice.id,
            "purpose": invoice.purpose,
            "amount_sats": invoice.amount_sats,
            "expires_at": invoice.expires_at,
        }),
    );
}

fn emit_paid(state: &DaemonState, refreshed: &Refreshed) {
    if !refreshed.became_paid {
        return;
    }
    let invoice = &refreshed.invoice;
    state.emit(
        "InvoicePaid",
        serde_json::json!({
            "location_id": invoice.location_id,
            "invoice_id": invoice.id,
            "purpose": invoice.purpose,
            "amount_sats": invoice.amount_sats,
        }),
    );
}
