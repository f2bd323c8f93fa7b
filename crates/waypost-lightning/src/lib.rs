//! # waypost-lightning
//!
//! Uniform interface over the Lightning backends Waypost can bill through.
//!
//! Every backend answers the same two questions: open an invoice for an
//! amount, and tell me whether a given invoice has been paid. How the answer
//! is discovered differs (polling a custodial wallet, webhook pushes from a
//! hosted processor, a node's REST API, or a developer pressing "mark paid"),
//! but callers only ever see [`PaymentProvider`].
//!
//! The backend is chosen once from configuration at process start and
//! injected where it is needed. Misconfiguration never degrades to "paid":
//! [`build_or_disabled`] installs a [`DisabledProvider`] that refuses every
//! call, so gated actions stay blocked.
//!
//! ## Modules
//!
//! - [`simulated`]: in-memory backend with a manual settle switch
//! - [`custodial`]: custodial REST wallet (LNbits-style API)
//! - [`hosted`]: hosted payment processor, webhook driven
//! - [`managed_node`]: managed LND node REST API, with a test mode

pub mod custodial;
pub mod hosted;
pub mod managed_node;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error types for payment provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The backend could not be reached or answered with a server error.
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    /// The backend is not usable with the current configuration.
    #[error("payment provider misconfigured: {0}")]
    Misconfigured(String),

    /// Amounts are whole, positive satoshis.
    #[error("invalid amount: {0} sats")]
    InvalidAmount(u64),

    /// The backend has no record of this invoice.
    #[error("unknown invoice: {0}")]
    UnknownInvoice(String),

    /// The backend refused the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The operation does not exist for this backend.
    #[error("{operation} is not supported by the {provider} provider")]
    Unsupported {
        /// Backend name.
        provider: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// The backend answered with something we could not interpret.
    #[error("unexpected provider response: {0}")]
    BadResponse(String),
}

/// Convenience result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A freshly created invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    /// Provider-scoped id used for status checks.
    pub invoice_id: String,
    /// String the payer's wallet consumes (BOLT11 for real backends).
    pub payment_request: String,
    /// Unix seconds after which the backend will no longer accept payment.
    pub expires_at: u64,
}

/// Payment state as reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Paid,
    Expired,
}

/// A status change pushed by a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookEvent {
    pub invoice_id: String,
    pub status: ProviderStatus,
}

/// The capability every Lightning backend provides.
///
/// Implementations must be safe to call concurrently. `check_status` is
/// idempotent and `create_invoice` returns as soon as the invoice exists; it
/// never waits for payment.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Open an invoice for `amount_sats` valid for `expiry_secs`.
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice>;

    /// Current payment state of an invoice.
    async fn check_status(&self, invoice_id: &str) -> Result<ProviderStatus>;

    /// Settle an invoice without a real payment (development networks only).
    async fn mark_paid(&self, _invoice_id: &str) -> Result<()> {
        Err(ProviderError::Unsupported {
            provider: self.name(),
            operation: "mark_paid",
        })
    }

    /// Interpret a webhook body pushed by the backend. Signature checking
    /// happens before the body reaches us.
    fn parse_webhook(&self, _payload: &serde_json::Value) -> Option<WebhookEvent> {
        None
    }
}

/// Provider used when configuration is invalid. Fails every call closed.
#[derive(Debug, Clone)]
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PaymentProvider for DisabledProvider {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn create_invoice(
        &self,
        _amount_sats: u64,
        _memo: &str,
        _expiry_secs: u64,
    ) -> Result<CreatedInvoice> {
        Err(ProviderError::Misconfigured(self.reason.clone()))
    }

    async fn check_status(&self, _invoice_id: &str) -> Result<ProviderStatus> {
        Err(ProviderError::Misconfigured(self.reason.clone()))
    }
}

/// `[lightning]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightningConfig {
    /// "simulated" | "custodial" | "hosted" | "managed_node".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Request timeout for HTTP backends.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub custodial: custodial::CustodialConfig,
    #[serde(default)]
    pub hosted: hosted::HostedConfig,
    #[serde(default)]
    pub managed_node: managed_node::ManagedNodeConfig,
}

fn default_provider() -> String {
    "simulated".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for LightningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_timeout_secs(),
            custodial: custodial::CustodialConfig::default(),
            hosted: hosted::HostedConfig::default(),
            managed_node: managed_node::ManagedNodeConfig::default(),
        }
    }
}

/// Construct the configured backend.
pub fn build(config: &LightningConfig) -> Result<Arc<dyn PaymentProvider>> {
    let provider: Arc<dyn PaymentProvider> = match config.provider.as_str() {
        "simulated" => Arc::new(simulated::SimulatedProvider::new()),
        "custodial" => Arc::new(custodial::CustodialProvider::new(
            &config.custodial,
            config.timeout_secs,
        )?),
        "hosted" => Arc::new(hosted::HostedProvider::new(&config.hosted, config.timeout_secs)?),
        "managed_node" => Arc::new(managed_node::ManagedNodeProvider::new(
            &config.managed_node,
            config.timeout_secs,
        )?),
        other => {
            return Err(ProviderError::Misconfigured(format!(
                "unknown provider '{other}'"
            )))
        }
    };
    tracing::info!(provider = provider.name(), "payment provider ready");
    Ok(provider)
}

/// Like [`build`], but falls back to a [`DisabledProvider`] so the process
/// can still serve free actions while every paid action stays blocked.
pub fn build_or_disabled(config: &LightningConfig) -> Arc<dyn PaymentProvider> {
    match build(config) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!(error = %e, "payment provider disabled");
            Arc::new(DisabledProvider::new(e.to_string()))
        }
    }
}

/// Reject zero amounts before talking to any backend.
pub(crate) fn validate_amount(amount_sats: u64) -> Result<()> {
    if amount_sats == 0 {
        return Err(ProviderError::InvalidAmount(amount_sats));
    }
    Ok(())
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared HTTP client construction for REST backends.
pub(crate) fn http_client(
    timeout_secs: u64,
    accept_invalid_certs: bool,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| ProviderError::Misconfigured(format!("http client: {e}")))
}

/// Send a request and decode a JSON body, mapping transport failures and
/// server errors to [`ProviderError::Unavailable`].
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    invoice_id: Option<&str>,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(id) = invoice_id {
            return Err(ProviderError::UnknownInvoice(id.to_string()));
        }
    }
    if status.is_server_error() {
        return Err(ProviderError::Unavailable(format!("HTTP {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Rejected(format!("HTTP {status}: {body}")));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProviderError::BadResponse(e.to_string()))
}

/// Trim a trailing slash so `base + "/path"` joins cleanly.
pub(crate) fn base_url(url: &str, provider: &'static str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ProviderError::Misconfigured(format!(
            "{provider}: url must start with http:// or https://"
        )));
    }
    Ok(trimmed.to_string())
}
