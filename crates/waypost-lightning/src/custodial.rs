//! Custodial REST wallet backend (LNbits-style API).
//!
//! Invoices are created with `POST /api/v1/payments` and polled with
//! `GET /api/v1/payments/{payment_hash}`. The wallet never pushes; payment
//! truth is discovered by polling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base_url, http_client, send_json, unix_now, validate_amount, CreatedInvoice, PaymentProvider,
    ProviderError, ProviderStatus, Result,
};

/// `[lightning.custodial]` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustodialConfig {
    /// Wallet base URL, e.g. `https://legend.lnbits.com`.
    #[serde(default)]
    pub url: String,
    /// Invoice/read key for the receiving wallet.
    #[serde(default)]
    pub api_key: String,
}

/// Custodial wallet client.
#[derive(Debug, Clone)]
pub struct CustodialProvider {
    client: reqwest::Client,
    base: String,
    api_key: String,
}

impl CustodialProvider {
    pub fn new(config: &CustodialConfig, timeout_secs: u64) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Misconfigured("custodial: api_key is empty".into()));
        }
        Ok(Self {
            client: http_client(timeout_secs, false)?,
            base: base_url(&config.url, "custodial")?,
            api_key: config.api_key.clone(),
        })
    }
}

/// Decode the wallet's create-invoice response.
///
/// Older wallet versions return `payment_request`, newer ones `bolt11`.
pub fn parse_created(body: &Value, now: u64, expiry_secs: u64) -> Result<CreatedInvoice> {
    let invoice_id = body
        .get("payment_hash")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::BadResponse("missing payment_hash".into()))?;
    let payment_request = body
        .get("payment_request")
        .or_else(|| body.get("bolt11"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::BadResponse("missing payment_request".into()))?;

    Ok(CreatedInvoice {
        invoice_id: invoice_id.to_string(),
        payment_request: payment_request.to_string(),
        expires_at: now + expiry_secs,
    })
}

/// Decode the wallet's payment status response.
pub fn parse_status(body: &Value) -> Result<ProviderStatus> {
    match body.get("paid").and_then(Value::as_bool) {
        Some(true) => Ok(ProviderStatus::Paid),
        Some(false) => Ok(ProviderStatus::Pending),
        None => Err(ProviderError::BadResponse("missing paid flag".into())),
    }
}

#[async_trait]
impl PaymentProvider for CustodialProvider {
    fn name(&self) -> &'static str {
        "custodial"
    }

    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        validate_amount(amount_sats)?;
        let request = self
            .client
            .post(format!("{}/api/v1/payments", self.base))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "out": false,
                "amount": amount_sats,
                "memo": memo,
                "expiry": expiry_secs,
            }));
        let body = send_json(request, None).await?;
        parse_created(&body, unix_now(), expiry_secs)
    }

    async fn check_status(&self, invoice_id: &str) -> Result<ProviderStatus> {
        let request = self
            .client
            .get(format!("{}/api/v1/payments/{invoice_id}", self.base))
            .header("X-Api-Key", &self.api_key);
        let body = send_json(request, Some(invoice_id)).await?;
        parse_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_legacy_field() {
        let body = serde_json::json!({"payment_hash": "abc", "payment_request": "lnbc50n1xyz"});
        let inv = parse_created(&body, 100, 900).expect("parse");
        assert_eq!(inv.invoice_id, "abc");
        assert_eq!(inv.payment_request, "lnbc50n1xyz");
        assert_eq!(inv.expires_at, 1000);
    }

    #[test]
    fn test_parse_created_bolt11_field() {
        let body = serde_json::json!({"payment_hash": "abc", "bolt11": "lnbc50n1xyz"});
        assert_eq!(parse_created(&body, 0, 1).expect("parse").payment_request, "lnbc50n1xyz");
    }

    #[test]
    fn test_parse_created_missing_hash() {
        let body = serde_json::json!({"payment_request": "lnbc"});
        assert!(matches!(parse_created(&body, 0, 1), Err(ProviderError::BadResponse(_))));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status(&serde_json::json!({"paid": true})).expect("paid"),
            ProviderStatus::Paid
        );
        assert_eq!(
            parse_status(&serde_json::json!({"paid": false})).expect("pending"),
            ProviderStatus::Pending
        );
        assert!(parse_status(&serde_json::json!({"status": "ok"})).is_err());
    }

    #[test]
    fn test_requires_api_key() {
        let config = CustodialConfig {
            url: "https://wallet.example".into(),
            api_key: String::new(),
        };
        assert!(matches!(
            CustodialProvider::new(&config, 10),
            Err(ProviderError::Misconfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_wallet_is_unavailable() {
        let config = CustodialConfig {
            url: "http://127.0.0.1:9".into(),
            api_key: "key".into(),
        };
        let provider = CustodialProvider::new(&config, 1).expect("build");
        assert!(matches!(
            provider.create_invoice(5, "post", 900).await,
            Err(ProviderError::Unavailable(_))
        ));
    }
}
