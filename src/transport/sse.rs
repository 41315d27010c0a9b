//! SSE backend transport (spec §4.1, §6.2): HTTP POST to send requests,
//! a persistent `text/event-stream` response carrying both replies and
//! unsolicited notifications. Parsed by hand against `reqwest`'s byte
//! stream — no `reqwest-eventsource` dependency, matching the pattern
//! used elsewhere in the surrounding MCP transport stack.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{BackendNotification, BackendTransport, ListPage};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcRequest, JsonRpcVersion, RequestId};

type PendingTable = DashMap<i64, oneshot::Sender<GatewayResult<Value>>>;

#[derive(Debug)]
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    next_id: AtomicI64,
    pending: Arc<PendingTable>,
    notif_tx: mpsc::Sender<BackendNotification>,
    notif_rx: Mutex<Option<mpsc::Receiver<BackendNotification>>>,
    stream_started: Mutex<bool>,
}

impl SseTransport {
    pub fn new(url: String, auth_token: Option<String>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        let (notif_tx, notif_rx) = mpsc::channel(256);
        Ok(Self {
            client,
            url,
            auth_token,
            next_id: AtomicI64::new(1),
            pending: Arc::new(DashMap::new()),
            notif_tx,
            notif_rx: Mutex::new(Some(notif_rx)),
            stream_started: Mutex::new(false),
        })
    }

    async fn ensure_stream(&self) -> GatewayResult<()> {
        let mut started = self.stream_started.lock().await;
        if *started {
            return Ok(());
        }

        let mut builder = self.client.get(&self.url).header("Accept", "text/event-stream");
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::backend_unavailable(&self.url, e.to_string()))?;

        let pending = self.pending.clone();
        let notif_tx = self.notif_tx.clone();
        let mut byte_stream = resp.bytes_stream();
        tokio::spawn(async move {
            let mut buf = BytesMut::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.windows(2).position(|w| w == b"\n\n") {
                    let event = buf.split_to(pos + 2);
                    dispatch_sse_event(&event, &pending, &notif_tx).await;
                }
            }
        });

        *started = true;
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> GatewayResult<Value> {
        self.ensure_stream().await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let mut builder = self.client.post(&self.url).json(&req);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Err(e) = builder.send().await {
            self.pending.remove(&id);
            return Err(GatewayError::backend_unavailable(&self.url, e.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&id);
                Err(GatewayError::protocol(&self.url, "response channel closed"))
            }
            Err(_) => {
                self.pending.remove(&id);
                Err(GatewayError::timeout(&self.url, method, timeout.as_millis() as u64))
            }
        }
    }
}

async fn dispatch_sse_event(
    raw: &[u8],
    pending: &PendingTable,
    notif_tx: &mpsc::Sender<BackendNotification>,
) {
    let text = String::from_utf8_lossy(raw);
    let data: String = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.trim_start())
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() {
        return;
    }
    let Ok(value) = serde_json::from_str::<Value>(&data) else {
        return;
    };

    if let Some(id) = value.get("id").and_then(|v| v.as_i64()) {
        if let Some((_, tx)) = pending.remove(&id) {
            let outcome = if let Some(error) = value.get("error") {
                let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("backend error")
                    .to_string();
                Err(GatewayError::backend_error("sse", code, message))
            } else {
                Ok(value.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = tx.send(outcome);
        }
    } else if let Some(method) = value.get("method").and_then(|v| v.as_str()) {
        let _ = notif_tx
            .send(BackendNotification {
                method: method.to_string(),
                params: value.get("params").cloned(),
            })
            .await;
    }
}

#[async_trait]
impl BackendTransport for SseTransport {
    async fn connect(&self) -> GatewayResult<Value> {
        self.request("initialize", Some(serde_json::json!({})), Duration::from_secs(30))
            .await
    }

    async fn list_page(&self, method: &str, cursor: Option<&str>) -> GatewayResult<ListPage> {
        let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
        let result = self.request(method, params, Duration::from_secs(30)).await?;
        let items = result
            .get(super::items_key(method))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let next_cursor = result
            .get("nextCursor")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(ListPage { items, next_cursor })
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value> {
        self.request(method, Some(params), timeout).await
    }

    fn notifications(&self) -> mpsc::Receiver<BackendNotification> {
        self.notif_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn is_connected(&self) -> bool {
        *self.stream_started.lock().await
    }

    async fn disconnect(&self) {
        *self.stream_started.lock().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_routes_response_to_pending_waiter() {
        let pending: PendingTable = DashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(1, tx);
        let (notif_tx, _notif_rx) = mpsc::channel(1);

        let event = b"data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        dispatch_sse_event(event, &pending, &notif_tx).await;

        let result = rx.await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_routes_notifications_without_id() {
        let pending: PendingTable = DashMap::new();
        let (notif_tx, mut notif_rx) = mpsc::channel(1);

        let event =
            b"data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n\n";
        dispatch_sse_event(event, &pending, &notif_tx).await;

        let notif = notif_rx.recv().await.unwrap();
        assert_eq!(notif.method, "notifications/tools/list_changed");
    }
}
