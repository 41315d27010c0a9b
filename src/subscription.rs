//! Bidirectional client↔backend resource subscription tracking and
//! `resources/updated` fan-out (spec §4.5).

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::GatewayResult;
use crate::identifier::BackendId;
use crate::transport::BackendTransport;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ForwardKey {
    client_id: String,
    namespaced_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReverseKey {
    backend_id: BackendId,
    original_uri: String,
}

struct Subscription {
    backend_id: BackendId,
    original_uri: String,
}

/// A delivered notification, ready for the GatewayFront to push down a
/// specific client's session.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub client_id: String,
    pub namespaced_uri: String,
}

struct State {
    forward: HashMap<ForwardKey, Subscription>,
    reverse: HashMap<ReverseKey, Vec<String>>,
}

pub struct SubscriptionManager {
    state: Mutex<State>,
    updates: mpsc::Sender<ResourceUpdate>,
}

impl SubscriptionManager {
    /// `updates` is the channel the GatewayFront drains to push
    /// `resources/updated` to client sessions; per-client delivery order
    /// matches arrival order from the backend because each reverse-map
    /// walk sends in the order subscribers were recorded and the whole
    /// send happens inside `onResourceUpdated`, itself called in the
    /// order notifications arrive from a given backend (spec §5).
    pub fn new(updates: mpsc::Sender<ResourceUpdate>) -> Self {
        Self {
            state: Mutex::new(State {
                forward: HashMap::new(),
                reverse: HashMap::new(),
            }),
            updates,
        }
    }

    pub async fn subscribe(
        &self,
        client_id: &str,
        namespaced_uri: &str,
        backend_id: &BackendId,
        original_uri: &str,
        transport: &dyn BackendTransport,
    ) -> GatewayResult<()> {
        let reverse_key = ReverseKey {
            backend_id: backend_id.clone(),
            original_uri: original_uri.to_string(),
        };
        let needs_backend_subscribe = {
            let state = self.state.lock();
            !state.reverse.contains_key(&reverse_key)
        };

        if needs_backend_subscribe {
            let params = serde_json::json!({ "uri": original_uri });
            transport
                .call("resources/subscribe", params, std::time::Duration::from_secs(30))
                .await?;
        }

        let mut state = self.state.lock();
        let is_new = state
            .forward
            .insert(
                ForwardKey {
                    client_id: client_id.to_string(),
                    namespaced_uri: namespaced_uri.to_string(),
                },
                Subscription {
                    backend_id: backend_id.clone(),
                    original_uri: original_uri.to_string(),
                },
            )
            .is_none();
        if is_new {
            state
                .reverse
                .entry(reverse_key)
                .or_default()
                .push(client_id.to_string());
        }
        Ok(())
    }

    /// Returns whether a subscription actually existed to remove (so a
    /// caller can keep a `subscriptions_active` gauge accurate without
    /// double-counting a no-op unsubscribe).
    pub async fn unsubscribe(
        &self,
        client_id: &str,
        namespaced_uri: &str,
        transport: Option<&dyn BackendTransport>,
    ) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state.forward.remove(&ForwardKey {
                client_id: client_id.to_string(),
                namespaced_uri: namespaced_uri.to_string(),
            })
        };
        let Some(sub) = removed else { return false };

        let reverse_key = ReverseKey {
            backend_id: sub.backend_id.clone(),
            original_uri: sub.original_uri.clone(),
        };
        let became_empty = {
            let mut state = self.state.lock();
            if let Some(subscribers) = state.reverse.get_mut(&reverse_key) {
                subscribers.retain(|c| c != client_id);
                let empty = subscribers.is_empty();
                if empty {
                    state.reverse.remove(&reverse_key);
                }
                empty
            } else {
                true
            }
        };

        if became_empty {
            if let Some(transport) = transport {
                let params = serde_json::json!({ "uri": sub.original_uri });
                if let Err(e) = transport
                    .call("resources/unsubscribe", params, std::time::Duration::from_secs(30))
                    .await
                {
                    warn!(backend_id = %sub.backend_id, uri = %sub.original_uri, error = %e, "best-effort unsubscribe failed");
                }
            }
        }
        true
    }

    pub fn backend_for(&self, client_id: &str, namespaced_uri: &str) -> Option<BackendId> {
        self.state
            .lock()
            .forward
            .get(&ForwardKey {
                client_id: client_id.to_string(),
                namespaced_uri: namespaced_uri.to_string(),
            })
            .map(|s| s.backend_id.clone())
    }

    /// Deliver `resources/updated` to every client subscribed to
    /// `(backend_id, original_uri)` (spec §4.5 `onResourceUpdated`).
    pub async fn on_resource_updated(&self, backend_id: &BackendId, original_uri: &str) {
        let (namespaced_uri, clients) = {
            let state = self.state.lock();
            let reverse_key = ReverseKey {
                backend_id: backend_id.clone(),
                original_uri: original_uri.to_string(),
            };
            let Some(clients) = state.reverse.get(&reverse_key).cloned() else {
                return;
            };
            let namespaced_uri = crate::identifier::namespace_uri(backend_id, original_uri);
            (namespaced_uri, clients)
        };

        for client_id in clients {
            let update = ResourceUpdate {
                client_id,
                namespaced_uri: namespaced_uri.clone(),
            };
            if self.updates.send(update).await.is_err() {
                warn!("resource update channel closed; dropping notification");
                break;
            }
        }
    }

    /// Release all of a client's subscriptions, coalescing backend
    /// unsubscribes. Transports are looked up lazily via `resolve`.
    pub async fn drop_client<F, Fut>(&self, client_id: &str, resolve_transport: F)
    where
        F: Fn(BackendId) -> Fut,
        Fut: std::future::Future<Output = Option<std::sync::Arc<dyn BackendTransport>>>,
    {
        let uris: Vec<String> = {
            let state = self.state.lock();
            state
                .forward
                .keys()
                .filter(|k| k.client_id == client_id)
                .map(|k| k.namespaced_uri.clone())
                .collect()
        };
        for uri in uris {
            let backend_id = self.backend_for(client_id, &uri);
            let transport = match backend_id {
                Some(id) => resolve_transport(id).await,
                None => None,
            };
            self.unsubscribe(client_id, &uri, transport.as_deref()).await;
        }
    }

    /// Remove every subscription owned by `backend_id` (its transport is
    /// already gone, so no backend-side unsubscribe is attempted) and
    /// return the set of clients that were affected, so a caller can push
    /// a `subscription-terminated` out-of-band event (spec §4.5
    /// `dropBackend`).
    pub fn drop_backend(&self, backend_id: &BackendId) -> HashSet<String> {
        let mut state = self.state.lock();
        let mut affected = HashSet::new();
        state.forward.retain(|key, sub| {
            let keep = &sub.backend_id != backend_id;
            if !keep {
                affected.insert(key.client_id.clone());
            }
            keep
        });
        state.reverse.retain(|key, _| &key.backend_id != backend_id);
        affected
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().forward.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BackendNotification, ListPage};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct FakeTransport {
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
    }

    #[async_trait]
    impl BackendTransport for FakeTransport {
        async fn connect(&self) -> GatewayResult<Value> {
            Ok(Value::Null)
        }
        async fn list_page(&self, _: &str, _: Option<&str>) -> GatewayResult<ListPage> {
            unimplemented!()
        }
        async fn call(&self, method: &str, _: Value, _: Duration) -> GatewayResult<Value> {
            match method {
                "resources/subscribe" => {
                    self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
                }
                "resources/unsubscribe" => {
                    self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
            Ok(Value::Null)
        }
        fn notifications(&self) -> mpsc::Receiver<BackendNotification> {
            mpsc::channel(1).1
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn disconnect(&self) {}
    }

    fn backend() -> BackendId {
        BackendId::new("fs").unwrap()
    }

    #[tokio::test]
    async fn subscribe_only_calls_backend_once_for_first_subscriber() {
        let (tx, _rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let transport = FakeTransport::default();
        let backend_id = backend();

        mgr.subscribe("c1", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();
        mgr.subscribe("c2", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();

        assert_eq!(transport.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_delivers_to_every_subscriber_exactly_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let transport = FakeTransport::default();
        let backend_id = backend();

        mgr.subscribe("c1", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();
        mgr.subscribe("c2", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();

        mgr.on_resource_updated(&backend_id, "file:///log").await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let mut clients = vec![first.client_id, second.client_id];
        clients.sort();
        assert_eq!(clients, vec!["c1".to_string(), "c2".to_string()]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_leaves_maps_as_if_never_subscribed() {
        let (tx, _rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let transport = FakeTransport::default();
        let backend_id = backend();

        mgr.subscribe("c1", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();
        assert_eq!(mgr.active_count(), 1);
        mgr.unsubscribe("c1", "fs_file_log", Some(&transport)).await;
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(transport.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_calls_backend_only_when_last_subscriber_leaves() {
        let (tx, _rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let transport = FakeTransport::default();
        let backend_id = backend();

        mgr.subscribe("c1", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();
        mgr.subscribe("c2", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();

        mgr.unsubscribe("c1", "fs_file_log", Some(&transport)).await;
        assert_eq!(transport.unsubscribe_calls.load(Ordering::SeqCst), 0);

        mgr.unsubscribe("c2", "fs_file_log", Some(&transport)).await;
        assert_eq!(transport.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_backend_removes_its_subscriptions_and_reports_affected_clients() {
        let (tx, _rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let transport = FakeTransport::default();
        let backend_id = backend();

        mgr.subscribe("c1", "fs_file_log", &backend_id, "file:///log", &transport)
            .await
            .unwrap();

        let affected = mgr.drop_backend(&backend_id);
        assert!(affected.contains("c1"));
        assert_eq!(mgr.active_count(), 0);
    }

    #[tokio::test]
    async fn no_subscribers_means_no_delivery() {
        let (tx, mut rx) = mpsc::channel(16);
        let mgr = SubscriptionManager::new(tx);
        let backend_id = backend();
        mgr.on_resource_updated(&backend_id, "file:///nope").await;
        assert!(rx.try_recv().is_err());
    }
}
