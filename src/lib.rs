//! Goblin: an MCP gateway that fronts an arbitrary set of backend MCP
//! servers and exposes their aggregated tools, prompts, and resources as
//! one logical server.
//!
//! The core pieces live one module each: [`transport`] (one session per
//! backend), [`pool`] (thundering-herd-guarded connection reuse),
//! [`registry`] (the namespaced catalog and its metadata cache),
//! [`router`] (dispatch), [`subscription`] (resource subscription
//! fan-out), [`dispatcher`] (backend notification demultiplexing), and
//! [`gateway_front`] (the client-facing MCP surface).

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway_front;
#[cfg(feature = "http-frontend")]
pub mod http_frontend;
pub mod identifier;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod subscription;
pub mod transport;

use std::sync::Arc;

use tokio::sync::mpsc;

use config::GatewayConfig;
use dispatcher::spawn_backend_listener;
use error::GatewayResult;
use gateway_front::GatewayFront;
use identifier::BackendId;
use metrics::Metrics;
use pool::TransportPool;
use registry::Registry;
use router::Router;
use subscription::{ResourceUpdate, SubscriptionManager};

/// Owns every long-lived component and wires them together per the
/// config; this is what a frontend (stdio/HTTP CLI entry point) drives.
pub struct Gateway {
    pub registry: Arc<Registry>,
    pub pool: Arc<TransportPool>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub router: Arc<Router>,
    pub front: Arc<GatewayFront>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<GatewayConfig>,
    pub resource_updates: mpsc::Receiver<ResourceUpdate>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new(config.policies.metadata_cache_ttl()));
        let pool = Arc::new(TransportPool::new());
        let (updates_tx, updates_rx) = mpsc::channel(256);
        let subscriptions = Arc::new(SubscriptionManager::new(updates_tx));
        let metrics = Arc::new(Metrics::new());
        let router = Arc::new(Router::new(
            registry.clone(),
            pool.clone(),
            subscriptions.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let front = Arc::new(GatewayFront::new(registry.clone(), router.clone(), subscriptions.clone()));
        Self {
            registry,
            pool,
            subscriptions,
            router,
            front,
            metrics,
            config,
            resource_updates: updates_rx,
        }
    }

    /// Connects every enabled backend, runs its initial sync, and starts
    /// its notification listener. Backends that fail to connect are
    /// logged and skipped — the gateway starts with whatever subset came
    /// up (spec §4.8: a backend never blocks others from becoming ready).
    pub async fn start_backends(&self) {
        for server in self.config.enabled_servers() {
            let Ok(backend_id) = BackendId::new(server.id.clone()) else {
                continue;
            };
            match self.pool.get(&backend_id, &server.transport).await {
                Ok(transport) => {
                    self.metrics.connection_opened(backend_id.as_str());
                    self.registry.add_backend(&backend_id, transport.as_ref()).await;
                    spawn_backend_listener(
                        backend_id,
                        transport,
                        self.registry.clone(),
                        self.subscriptions.clone(),
                        self.metrics.clone(),
                    );
                }
                Err(e) => {
                    tracing::warn!(backend_id = %backend_id, error = %e, "failed to connect backend at startup");
                }
            }
        }
    }

    pub async fn shutdown_backend(&self, backend_id: &BackendId) {
        self.pool.drop_backend(backend_id).await;
        self.registry.remove_backend(backend_id);
        self.subscriptions.drop_backend(backend_id);
        self.metrics.connection_closed(backend_id.as_str());
    }

    pub fn load_config(path: impl AsRef<std::path::Path>) -> GatewayResult<GatewayConfig> {
        GatewayConfig::load(path)
    }
}
