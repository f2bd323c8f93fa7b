//! waypostd: the Waypost pin-metering daemon.
//!
//! Single OS process running a Tokio async runtime. Clients talk to the
//! daemon with line-delimited JSON-RPC over a Unix socket.

mod commands;
mod config;
mod events;
mod rpc;

use std::sync::Arc;

use tracing::{error, info};
use waypost_gate::{
    ActionGate, Clock, InvoiceLedger, SharedDb, SponsorAuction, SystemClock,
};
use waypost_lightning::PaymentProvider;

use crate::config::DaemonConfig;
use crate::events::{Event, EventBus};
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Ledger database connection.
    pub db: SharedDb,
    /// Configuration.
    pub config: DaemonConfig,
    /// Post, reply, boost and delete decisions.
    pub gate: ActionGate,
    /// Invoice ledger shared by the gate and the auction.
    pub invoices: InvoiceLedger,
    /// Sponsorship auction.
    pub auction: SponsorAuction,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Unix time the daemon started.
    pub started_at: u64,
}

impl DaemonState {
    /// Wire the ledgers around one connection and one provider.
    pub fn new(
        conn: rusqlite::Connection,
        config: DaemonConfig,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let db: SharedDb = Arc::new(tokio::sync::Mutex::new(conn));
        let invoices = InvoiceLedger::new(
            db.clone(),
            provider,
            clock.clone(),
            config.pricing.invoice_ttl_secs,
        );
        let gate = ActionGate::new(
            db.clone(),
            invoices.clone(),
            config.pricing.clone(),
            clock.clone(),
        );
        let auction = SponsorAuction::new(
            db.clone(),
            invoices.clone(),
            config.sponsorship.clone(),
            clock.clone(),
        );
        let event_bus = EventBus::new(config.server.event_buffer);
        let started_at = clock.now();
        Self {
            db,
            config,
            gate,
            invoices,
            auction,
            clock,
            event_bus,
            started_at,
        }
    }

    /// Emit an event stamped with the daemon clock.
    pub fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.event_bus
            .emit(Event::new(event_type, self.clock.now(), payload));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config (the log level lives there)
    let config = DaemonConfig::load()?;

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("waypost={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("Waypost daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 3. Open database
    let db_path = data_dir.join("waypost.db");
    let conn = waypost_db::open(&db_path)?;
    info!(path = ?db_path, "ledger database open");

    // 4. Payment provider; a broken config keeps free actions working
    let provider = waypost_lightning::build_or_disabled(&config.lightning);
    if config.advanced.dev_mode {
        info!("dev mode enabled: dev_mark_invoice_paid is available");
    }

    // 5. Build daemon state
    let socket_path = config.socket_path();
    let state = Arc::new(DaemonState::new(
        conn,
        config,
        provider,
        Arc::new(SystemClock),
    ));

    // 6. Start IPC server
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());
    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 7. Emit DaemonStarted event
    state.emit(
        "DaemonStarted",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "provider": state.invoices.provider_name(),
        }),
    );

    // 8. Run the RPC server until shutdown
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
