use broker_registry::PeerRegistry;
use broker_rpc::RpcClient;
use broker_store::Store;
use std::sync::Arc;

pub type Leadership = broker_leadership::Leadership<RpcClient>;

/// Shared state handed to every handler via `axum::extract::State`, built once at process
/// start the way the teacher's `http_api::Context` is: one `Arc` bundling every component
/// the HTTP surface needs, so handlers stay thin (teacher idiom: one function per route,
/// errors flow through a single `Error` enum).
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub store: Arc<Store>,
    pub leadership: Arc<Leadership>,
    pub rpc: Arc<RpcClient>,
    pub log: slog::Logger,
}

impl AppState {
    pub fn new(
        registry: Arc<PeerRegistry>,
        store: Arc<Store>,
        leadership: Arc<Leadership>,
        rpc: Arc<RpcClient>,
        log: slog::Logger,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            leadership,
            rpc,
            log,
        })
    }
}
