use std::path::PathBuf;
use std::sync::Arc;

use courier_ai::{HttpAiClient, ReliableAiClient};
use courier_dispatch::InMemorySharedStore;
use courier_outbox::LoggingBroker;
use courier_server::ServerConfig;
use courier_store::Database;
use courier_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() {
    init_telemetry(&TelemetryConfig::default());

    tracing::info!("starting courier");

    let data_dir = dirs_home().join(".courier");
    std::fs::create_dir_all(&data_dir).expect("failed to create data directory");
    let db_path = std::env::var("COURIER_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("courier.db"));
    let db = Database::open(&db_path).expect("failed to open database");

    let ai_base =
        std::env::var("COURIER_AI_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".into());
    let ai = Arc::new(ReliableAiClient::with_defaults(HttpAiClient::new(ai_base)));

    // Single-process defaults. Multi-process deployments substitute
    // network-backed SharedStore and BrokerPublisher implementations.
    let shared_store = Arc::new(InMemorySharedStore::new());
    let broker = Arc::new(LoggingBroker);

    let mut config = ServerConfig::default();
    if let Some(port) = std::env::var("COURIER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
    {
        config.port = port;
    }

    let handle = courier_server::start(config, db, shared_store, ai, broker)
        .await
        .expect("failed to start server");
    tracing::info!(port = handle.port, "courier ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    handle.shutdown();
    tracing::info!("shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
