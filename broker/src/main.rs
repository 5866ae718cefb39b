//! Process entry point: parses configuration, wires the six components together and runs
//! the HTTP surface plus the two background loops (health monitor, gossip) and the
//! delayed startup election, the way the teacher's `lighthouse` binary wires up
//! `beacon_node`/`network`/`http_api` under one `environment` and blocks on shutdown.

use broker_leadership::Leadership;
use broker_registry::PeerRegistry;
use broker_rpc::RpcClient;
use broker_store::Store;
use clap::Parser;
use slog::{info, o};
use std::net::SocketAddr;
use std::sync::Arc;

/// A replicated publish/subscribe message broker peer.
#[derive(Parser, Debug)]
#[command(name = "broker", author, version, about)]
struct Args {
    /// This broker's id within the compiled-in peer table. Also read from `BROKER_ID`.
    #[arg(long, env = "BROKER_ID", default_value_t = 1)]
    broker_id: u32,

    /// Port the HTTP surface listens on. Also read from `BROKER_LISTEN_PORT`.
    #[arg(long, env = "BROKER_LISTEN_PORT", default_value_t = 5001)]
    listen_port: u16,

    /// Log verbosity: trace, debug, info, warn, error or critical.
    #[arg(long, env = "BROKER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log = broker_logging::root_logger(&args.log_level);

    let registry = Arc::new(PeerRegistry::from_default_table(args.broker_id));
    let store = Arc::new(Store::new());
    let rpc = Arc::new(RpcClient::new());

    let leader_log = log.new(o!("broker_id" => args.broker_id));
    let leadership = Arc::new(Leadership::new(
        registry.clone(),
        rpc.clone(),
        log.clone(),
        move |leader_id| {
            info!(leader_log, "leader updated"; "leader_id" => leader_id);
        },
    ));

    let gossip = Arc::new(broker_gossip::GossipLoop::new(
        store.clone(),
        registry.clone(),
        rpc.clone(),
        log.clone(),
    ));

    tokio::spawn(leadership.clone().run_startup_election());
    tokio::spawn(leadership.clone().health_monitor_loop());
    tokio::spawn(gossip.run());

    let state = broker_http::AppState::new(registry.clone(), store, leadership, rpc, log.clone());
    let app = broker_http::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));

    info!(log, "broker started";
        "broker_id" => registry.self_id(), "listen_address" => %addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| panic!("http server error: {e}"));

    info!(log, "broker shut down");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
