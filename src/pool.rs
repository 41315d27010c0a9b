//! `TransportPool`: lazily establishes and caches one `BackendTransport`
//! per backend, deduplicating concurrent connection attempts (spec
//! §4.2). The guard mutex's critical section never awaits — only the
//! connect future itself, shared across every caller that arrived while
//! it was in flight, does.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::config::TransportDef;
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::BackendId;
use crate::transport::{self, BackendTransport};

type ConnectOutcome = Result<Arc<dyn BackendTransport>, ConnectError>;
type ConnectFuture = Shared<std::pin::Pin<Box<dyn std::future::Future<Output = ConnectOutcome> + Send>>>;

/// Connection failures are cloned across every awaiter of a shared
/// future, so they carry only a message, not the original `GatewayError`
/// (which isn't `Clone`).
#[derive(Debug, Clone)]
pub struct ConnectError(pub String);

enum Slot {
    Connected(Arc<dyn BackendTransport>),
    Pending(ConnectFuture),
}

pub struct TransportPool {
    slots: Mutex<HashMap<BackendId, Slot>>,
}

impl Default for TransportPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportPool {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a connected transport for `backend_id`, creating one if
    /// necessary. At most one `connect()` call is ever in flight per
    /// backend at a time, regardless of how many callers race here.
    pub async fn get(
        &self,
        backend_id: &BackendId,
        def: &TransportDef,
    ) -> GatewayResult<Arc<dyn BackendTransport>> {
        let fut = {
            let mut slots = self.slots.lock();
            match slots.get(backend_id) {
                Some(Slot::Connected(transport)) => return Ok(transport.clone()),
                Some(Slot::Pending(fut)) => fut.clone(),
                None => {
                    let fut = spawn_connect(def.clone());
                    slots.insert(backend_id.clone(), Slot::Pending(fut.clone()));
                    fut
                }
            }
        };

        let outcome = fut.await;

        let mut slots = self.slots.lock();
        match &outcome {
            Ok(transport) => {
                slots.insert(backend_id.clone(), Slot::Connected(transport.clone()));
            }
            Err(_) => {
                // Only clear the pending slot if it's still the future we
                // just awaited — a later caller may already have replaced
                // it with a fresh retry attempt.
                if matches!(slots.get(backend_id), Some(Slot::Pending(_))) {
                    slots.remove(backend_id);
                }
            }
        }
        drop(slots);

        outcome.map_err(|e| GatewayError::backend_unavailable(backend_id.as_str(), e.0))
    }

    /// Seed a backend's slot with an already-connected transport,
    /// bypassing `connect()` entirely. Used when a transport was
    /// established out-of-band (e.g. an `inspect` session handed off to a
    /// long-running gateway, or — in tests — a fake transport standing in
    /// for a real backend process).
    pub fn insert(&self, backend_id: BackendId, transport: Arc<dyn BackendTransport>) {
        self.slots.lock().insert(backend_id, Slot::Connected(transport));
    }

    /// Close and evict a backend's transport, if present.
    ///
    /// ```
    /// # use goblin::identifier::BackendId;
    /// # use goblin::pool::TransportPool;
    /// # tokio_test::block_on(async {
    /// let pool = TransportPool::new();
    /// let backend_id = BackendId::new("filesystem").unwrap();
    /// // Evicting a backend that was never connected is a no-op.
    /// pool.drop_backend(&backend_id).await;
    /// assert!(!pool.is_connected(&backend_id));
    /// # });
    /// ```
    pub async fn drop_backend(&self, backend_id: &BackendId) {
        let removed = {
            let mut slots = self.slots.lock();
            slots.remove(backend_id)
        };
        if let Some(Slot::Connected(transport)) = removed {
            transport.disconnect().await;
        }
    }

    pub fn is_connected(&self, backend_id: &BackendId) -> bool {
        matches!(self.slots.lock().get(backend_id), Some(Slot::Connected(_)))
    }

    /// Returns the backend's transport only if already connected, without
    /// triggering a new connection attempt. Used for best-effort cleanup
    /// paths (e.g. releasing subscriptions on client disconnect) where a
    /// cold backend simply has nothing to clean up.
    pub fn get_if_connected(&self, backend_id: &BackendId) -> Option<Arc<dyn BackendTransport>> {
        match self.slots.lock().get(backend_id) {
            Some(Slot::Connected(transport)) => Some(transport.clone()),
            _ => None,
        }
    }
}

fn spawn_connect(def: TransportDef) -> ConnectFuture {
    let fut = async move {
        let transport = transport::build(&def).map_err(|e| ConnectError(e.to_string()))?;
        transport
            .connect()
            .await
            .map_err(|e| ConnectError(e.to_string()))?;
        Ok::<Arc<dyn BackendTransport>, ConnectError>(Arc::from(transport))
    };
    (Box::pin(fut) as std::pin::Pin<Box<dyn std::future::Future<Output = ConnectOutcome> + Send>>).shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BackendNotification, ListPage};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct CountingTransport {
        connect_calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl BackendTransport for CountingTransport {
        async fn connect(&self) -> GatewayResult<Value> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                Err(GatewayError::backend_unavailable("test", "refused"))
            } else {
                Ok(Value::Null)
            }
        }

        async fn list_page(&self, _: &str, _: Option<&str>) -> GatewayResult<ListPage> {
            unimplemented!()
        }

        async fn call(&self, _: &str, _: Value, _: Duration) -> GatewayResult<Value> {
            unimplemented!()
        }

        fn notifications(&self) -> mpsc::Receiver<BackendNotification> {
            mpsc::channel(1).1
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) {}
    }

    // This test exercises the guard logic directly against a fake
    // transport rather than going through `transport::build`, since the
    // thundering-herd property is about the pool's own bookkeeping, not
    // any particular wire format.
    #[tokio::test]
    async fn concurrent_gets_connect_exactly_once() {
        let connect_calls = Arc::new(AtomicUsize::new(0));
        let backend_id = BackendId::new("test").unwrap();

        // We can't substitute a fake transport through the public `get`
        // API (it always builds from a `TransportDef`), so this test
        // drives the same guard algorithm against the fake directly.
        let slots: Arc<Mutex<HashMap<BackendId, Slot>>> = Arc::new(Mutex::new(HashMap::new()));
        let calls = connect_calls.clone();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let slots = slots.clone();
            let calls = calls.clone();
            let backend_id = backend_id.clone();
            handles.push(tokio::spawn(async move {
                let fut = {
                    let mut guard = slots.lock();
                    match guard.get(&backend_id) {
                        Some(Slot::Connected(t)) => return t.clone() as Arc<dyn BackendTransport>,
                        Some(Slot::Pending(f)) => f.clone(),
                        None => {
                            let calls = calls.clone();
                            let fut = async move {
                                let t = CountingTransport {
                                    connect_calls: calls,
                                    fail: false,
                                };
                                t.connect().await.map_err(|e| ConnectError(e.to_string()))?;
                                Ok::<Arc<dyn BackendTransport>, ConnectError>(Arc::new(t))
                            };
                            let shared: ConnectFuture = (Box::pin(fut)
                                as std::pin::Pin<
                                    Box<dyn std::future::Future<Output = ConnectOutcome> + Send>,
                                >)
                                .shared();
                            guard.insert(backend_id.clone(), Slot::Pending(shared.clone()));
                            shared
                        }
                    }
                };
                let outcome = fut.await;
                let mut guard = slots.lock();
                if let Ok(t) = &outcome {
                    guard.insert(backend_id.clone(), Slot::Connected(t.clone()));
                }
                outcome.unwrap()
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_not_cached_and_can_be_retried() {
        let pool = TransportPool::new();
        let backend_id = BackendId::new("missing").unwrap();
        let def = TransportDef::Stdio {
            command: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            env: Default::default(),
        };

        let first = pool.get(&backend_id, &def).await;
        assert!(first.is_err());
        assert!(!pool.is_connected(&backend_id));

        let second = pool.get(&backend_id, &def).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn get_if_connected_is_none_until_a_transport_is_cached() {
        let pool = TransportPool::new();
        let backend_id = BackendId::new("fs").unwrap();
        assert!(pool.get_if_connected(&backend_id).is_none());

        let transport: Arc<dyn BackendTransport> = Arc::new(CountingTransport {
            connect_calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        pool.insert(backend_id.clone(), transport);
        assert!(pool.get_if_connected(&backend_id).is_some());
    }
}
