//! Hosted payment processor backend.
//!
//! Charges are created with `POST /v1/charges`. The processor pushes status
//! changes to a webhook which the daemon forwards to the invoice ledger;
//! `GET /v1/charge/{id}` is the polling fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base_url, http_client, send_json, unix_now, validate_amount, CreatedInvoice, PaymentProvider,
    ProviderError, ProviderStatus, Result, WebhookEvent,
};

/// `[lightning.hosted]` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostedConfig {
    /// Processor API base URL.
    #[serde(default)]
    pub url: String,
    /// API key sent in the `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// URL the processor should call on status changes.
    #[serde(default)]
    pub callback_url: String,
}

/// Hosted processor client.
#[derive(Debug, Clone)]
pub struct HostedProvider {
    client: reqwest::Client,
    base: String,
    api_key: String,
    callback_url: Option<String>,
}

impl HostedProvider {
    pub fn new(config: &HostedConfig, timeout_secs: u64) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Misconfigured("hosted: api_key is empty".into()));
        }
        let callback_url = Some(config.callback_url.trim().to_string()).filter(|u| !u.is_empty());
        if callback_url.is_none() {
            tracing::warn!("hosted provider has no callback_url; relying on polling only");
        }
        Ok(Self {
            client: http_client(timeout_secs, false)?,
            base: base_url(&config.url, "hosted")?,
            api_key: config.api_key.clone(),
            callback_url,
        })
    }
}

/// Map a processor charge status string.
pub fn map_status(status: &str) -> Option<ProviderStatus> {
    match status {
        "unpaid" | "processing" | "pending" => Some(ProviderStatus::Pending),
        "paid" => Some(ProviderStatus::Paid),
        "expired" | "refunded" => Some(ProviderStatus::Expired),
        _ => None,
    }
}

/// Decode the processor's create-charge response.
pub fn parse_created(body: &Value, now: u64, expiry_secs: u64) -> Result<CreatedInvoice> {
    let data = body.get("data").unwrap_or(body);
    let invoice_id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::BadResponse("missing charge id".into()))?;
    let lightning = data
        .get("lightning_invoice")
        .ok_or_else(|| ProviderError::BadResponse("missing lightning_invoice".into()))?;
    let payment_request = lightning
        .get("payreq")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::BadResponse("missing payreq".into()))?;
    // The processor's own expiry wins when it is sooner than ours.
    let expires_at = lightning
        .get("expires_at")
        .and_then(Value::as_u64)
        .map(|t| t.min(now + expiry_secs))
        .unwrap_or(now + expiry_secs);

    Ok(CreatedInvoice {
        invoice_id: invoice_id.to_string(),
        payment_request: payment_request.to_string(),
        expires_at,
    })
}

/// Decode the processor's charge lookup response.
pub fn parse_status(body: &Value) -> Result<ProviderStatus> {
    let data = body.get("data").unwrap_or(body);
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::BadResponse("missing status".into()))?;
    map_status(status)
        .ok_or_else(|| ProviderError::BadResponse(format!("unknown status '{status}'")))
}

#[async_trait]
impl PaymentProvider for HostedProvider {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        validate_amount(amount_sats)?;
        let mut charge = serde_json::json!({
            "amount": amount_sats,
            "currency": "btc",
            "description": memo,
            "ttl": expiry_secs.div_ceil(60),
        });
        if let Some(ref callback) = self.callback_url {
            charge["callback_url"] = Value::String(callback.clone());
        }
        let request = self
            .client
            .post(format!("{}/v1/charges", self.base))
            .header("Authorization", &self.api_key)
            .json(&charge);
        let body = send_json(request, None).await?;
        parse_created(&body, unix_now(), expiry_secs)
    }

    async fn check_status(&self, invoice_id: &str) -> Result<ProviderStatus> {
        let request = self
            .client
            .get(format!("{}/v1/charge/{invoice_id}", self.base))
            .header("Authorization", &self.api_key);
        let body = send_json(request, Some(invoice_id)).await?;
        parse_status(&body)
    }

    fn parse_webhook(&self, payload: &Value) -> Option<WebhookEvent> {
        let invoice_id = payload.get("id").and_then(Value::as_str)?;
        let status = payload.get("status").and_then(Value::as_str).and_then(map_status)?;
        Some(WebhookEvent {
            invoice_id: invoice_id.to_string(),
            status,
        })
    }
}
