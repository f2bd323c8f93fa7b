//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! JSON-RPC method calls to the appropriate command handlers. A connection
//! that calls `subscribe_events` also receives `event` notifications on the
//! same stream.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use waypost_gate::{GateError, NotEligible, PaymentRequired};
use waypost_types::invoice::InvoiceConflict;

use crate::commands;
use crate::events::{Event, EventFilter};
use crate::DaemonState;

/// Responses and notifications queued per connection.
const OUTBOUND_BUFFER: usize = 256;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    // Metering errors

    /// Payment required (-32042).
    pub fn payment_required(required: &PaymentRequired) -> Self {
        let mut data = serde_json::json!({
            "requires_payment": true,
            "purpose": required.purpose,
            "amount_sats": required.amount_sats,
            "http_status": 402,
        });
        if let Some(used) = required.posts_used {
            data["posts_used"] = used.into();
        }
        if let Some(limit) = required.posts_limit {
            data["posts_limit"] = limit.into();
        }
        Self {
            code: -32042,
            message: "PAYMENT_REQUIRED".to_string(),
            data: Some(data),
        }
    }

    /// Invalid, unpaid, expired or spent invoice (-32043).
    pub fn invoice_invalid(conflict: InvoiceConflict) -> Self {
        Self {
            code: -32043,
            message: "INVOICE_INVALID".to_string(),
            data: Some(serde_json::json!({
                "error": "invalid or unpaid invoice",
                "reason": conflict,
                "detail": conflict.to_string(),
                "http_status": 402,
            })),
        }
    }

    /// Posting cooldown still running (-32044).
    pub fn cooldown_active(remaining_secs: u64) -> Self {
        Self {
            code: -32044,
            message: "COOLDOWN_ACTIVE".to_string(),
            data: Some(serde_json::json!({
                "error": NotEligible::CooldownActive { remaining_secs }.to_string(),
                "retry_after_secs": remaining_secs,
                "http_status": 429,
            })),
        }
    }

    /// Action refused for the caller (-32045).
    pub fn not_eligible(reason: &NotEligible) -> Self {
        let mut data = serde_json::json!({
            "error": reason.to_string(),
            "reason": not_eligible_code(reason),
            "http_status": 403,
        });
        if let NotEligible::BidTooLow { minimum_sats } = reason {
            data["minimum_sats"] = (*minimum_sats).into();
        }
        Self {
            code: -32045,
            message: "NOT_ELIGIBLE".to_string(),
            data: Some(data),
        }
    }

    /// Payment backend unreachable or misconfigured (-32046).
    pub fn provider_unavailable() -> Self {
        Self {
            code: -32046,
            message: "PROVIDER_UNAVAILABLE".to_string(),
            data: Some(serde_json::json!({
                "error": "payment provider unavailable, try again",
                "http_status": 503,
            })),
        }
    }

    /// Development method called while dev mode is off (-32047).
    pub fn dev_mode_disabled() -> Self {
        Self {
            code: -32047,
            message: "DEV_MODE_DISABLED".to_string(),
            data: None,
        }
    }
}

fn not_eligible_code(reason: &NotEligible) -> &'static str {
    match reason {
        NotEligible::CooldownActive { .. } => "cooldown_active",
        NotEligible::BidTooLow { .. } => "bid_too_low",
        NotEligible::NotOwner => "not_owner",
        NotEligible::PinNotFound => "pin_not_found",
        NotEligible::PinDeleted => "pin_deleted",
    }
}

impl From<GateError> for RpcError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Validation(detail) => RpcError::invalid_params(&detail),
            GateError::NotEligible(NotEligible::CooldownActive { remaining_secs }) => {
                RpcError::cooldown_active(remaining_secs)
            }
            GateError::NotEligible(reason) => RpcError::not_eligible(&reason),
            GateError::InvoiceConflict(conflict) => RpcError::invoice_invalid(conflict),
            GateError::ProviderUnavailable(detail) => {
                warn!(%detail, "payment provider unavailable");
                RpcError::provider_unavailable()
            }
            GateError::Db(e) => {
                error!(error = %e, "ledger error");
                RpcError::internal_error("ledger error")
            }
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Responses and event notifications share one writer task so they never
/// interleave mid-line.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let writer_task: JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        while let Some(mut message) = out_rx.recv().await {
            message.push('\n');
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    });

    let mut subscription: Option<JoinHandle<()>> = None;

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) if request.method == "subscribe_events" => {
                match commands::diagnostics::subscribe_events(&request.params) {
                    Ok((filter, result)) => {
                        if let Some(previous) = subscription.take() {
                            previous.abort();
                        }
                        subscription = Some(forward_events(
                            state.event_bus.subscribe(),
                            filter,
                            out_tx.clone(),
                        ));
                        RpcResponse::success(request.id, result)
                    }
                    Err(err) => RpcResponse::error(request.id, err),
                }
            }
            Ok(request) if request.method == "unsubscribe_events" => {
                let was_subscribed = subscription.take().map(|h| h.abort()).is_some();
                RpcResponse::success(
                    request.id,
                    serde_json::json!({"unsubscribed": was_subscribed}),
                )
            }
            Ok(request) => dispatch_request(state.clone(), request).await,
            Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
        };

        if out_tx.send(serde_json::to_string(&response)?).await.is_err() {
            break;
        }
    }

    if let Some(handle) = subscription.take() {
        handle.abort();
    }
    drop(out_tx);
    writer_task.await??;
    Ok(())
}

/// Push matching events to a connection until it goes away.
fn forward_events(
    mut events: broadcast::Receiver<Event>,
    filter: EventFilter,
    out: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }
                    let notification = serde_json::json!({
                        "jsonrpc": "2.0",
                        "method": "event",
                        "params": event,
                    });
                    let Ok(message) = serde_json::to_string(&notification) else {
                        continue;
                    };
                    if out.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();

    debug!("RPC call: {}", method);

    let result = match method {
        // Pin actions
        "create_post" => commands::actions::create_post(&state, &request.params).await,
        "create_reply" => commands::actions::create_reply(&state, &request.params).await,
        "boost_pin" => commands::actions::boost_pin(&state, &request.params).await,
        "delete_pin" => commands::actions::delete_pin(&state, &request.params).await,
        "get_quota_status" => commands::actions::get_quota_status(&state, &request.params).await,

        // Invoices
        "create_invoice" => commands::invoices::create_invoice(&state, &request.params).await,
        "get_invoice" => commands::invoices::get_invoice(&state, &request.params).await,
        "check_invoice" => commands::invoices::check_invoice(&state, &request.params).await,
        "apply_payment_webhook" => {
            commands::invoices::apply_payment_webhook(&state, &request.params).await
        }

        // Sponsorship
        "get_sponsor_minimum" => {
            commands::sponsors::get_sponsor_minimum(&state, &request.params).await
        }
        "open_sponsor_bid" => commands::sponsors::open_sponsor_bid(&state, &request.params).await,
        "confirm_sponsor_bid" => {
            commands::sponsors::confirm_sponsor_bid(&state, &request.params).await
        }
        "get_sponsor_queue" => commands::sponsors::get_sponsor_queue(&state, &request.params).await,
        "get_sponsor_history" => {
            commands::sponsors::get_sponsor_history(&state, &request.params).await
        }

        // Diagnostics
        "get_daemon_info" => commands::diagnostics::get_daemon_info(&state).await,

        // Dev-only commands
        "dev_mark_invoice_paid" => {
            commands::invoices::dev_mark_invoice_paid(&state, &request.params).await
        }

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}
