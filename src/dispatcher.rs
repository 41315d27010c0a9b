//! Demultiplexes backend-originated notifications into the Registry
//! (targeted re-sync) and SubscriptionManager (resource fan-out), per the
//! table in spec §4.6.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::identifier::{BackendId, CapabilityKind};
use crate::metrics::Metrics;
use crate::registry::Registry;
use crate::subscription::SubscriptionManager;
use crate::transport::{BackendNotification, BackendTransport};

/// Spawns a task that drains `transport`'s notification channel for the
/// lifetime of the backend session, dispatching each message per spec
/// §4.6's table. Re-sync is targeted when the notification carries a
/// recognizable kind; a malformed/unrecognized notification is logged and
/// otherwise ignored — it is not a protocol error on its own.
pub fn spawn_backend_listener(
    backend_id: BackendId,
    transport: Arc<dyn BackendTransport>,
    registry: Arc<Registry>,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<Metrics>,
) -> tokio::task::JoinHandle<()> {
    let mut notifications = transport.notifications();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            dispatch(&backend_id, notification, transport.as_ref(), &registry, &subscriptions, &metrics).await;
        }
    })
}

async fn dispatch(
    backend_id: &BackendId,
    notification: BackendNotification,
    transport: &dyn BackendTransport,
    registry: &Registry,
    subscriptions: &SubscriptionManager,
    metrics: &Metrics,
) {
    match notification.method.as_str() {
        "notifications/tools/list_changed" => {
            resync(registry, backend_id, transport, CapabilityKind::Tools, metrics).await;
        }
        "notifications/prompts/list_changed" => {
            resync(registry, backend_id, transport, CapabilityKind::Prompts, metrics).await;
        }
        "notifications/resources/list_changed" => {
            resync(registry, backend_id, transport, CapabilityKind::Resources, metrics).await;
            resync(registry, backend_id, transport, CapabilityKind::ResourceTemplates, metrics).await;
        }
        "notifications/resources/updated" => {
            if let Some(uri) = extract_uri(&notification.params) {
                subscriptions.on_resource_updated(backend_id, &uri).await;
            } else {
                warn!(backend_id = %backend_id, "resources/updated notification missing uri");
            }
        }
        other => {
            warn!(backend_id = %backend_id, method = %other, "unrecognized backend notification");
        }
    }
}

async fn resync(
    registry: &Registry,
    backend_id: &BackendId,
    transport: &dyn BackendTransport,
    kind: CapabilityKind,
    metrics: &Metrics,
) {
    if let Err(e) = registry.sync(backend_id, transport, Some(kind)).await {
        error!(backend_id = %backend_id, kind = %kind, error = %e, "targeted re-sync failed");
        metrics.sync_failure(backend_id.as_str(), kind.as_str());
    }
}

fn extract_uri(params: &Option<Value>) -> Option<String> {
    params.as_ref()?.get("uri")?.as_str().map(str::to_string)
}
