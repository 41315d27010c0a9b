//! Child-process backend transport: newline-delimited JSON-RPC over the
//! spawned process's stdin/stdout, matching the framing the surrounding
//! MCP tooling uses for its own stdio child processes.

use std::collections::HashMap;
use std::process::Stdio as ProcStdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{BackendNotification, BackendTransport, ListPage};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcRequest, JsonRpcVersion, RequestId};

/// Pending request table: request id -> the one-shot waiting for its
/// response. Mirrors the DashMap-keyed-by-id pattern used elsewhere in
/// the surrounding codebase for frontend/backend id correlation, here
/// applied to in-flight stdio calls instead of cross-session id mapping.
type PendingTable = DashMap<i64, oneshot::Sender<GatewayResult<Value>>>;

#[derive(Debug)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<tokio::process::ChildStdin>>,
    pending: std::sync::Arc<PendingTable>,
    next_id: AtomicI64,
    notif_tx: mpsc::Sender<BackendNotification>,
    notif_rx: Mutex<Option<mpsc::Receiver<BackendNotification>>>,
}

impl StdioTransport {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Self {
        let (notif_tx, notif_rx) = mpsc::channel(256);
        Self {
            command,
            args,
            env,
            child: Mutex::new(None),
            writer: Mutex::new(None),
            pending: std::sync::Arc::new(DashMap::new()),
            next_id: AtomicI64::new(1),
            notif_tx,
            notif_rx: Mutex::new(Some(notif_rx)),
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        };
        let mut line = serde_json::to_vec(&req)?;
        line.push(b'\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        {
            let mut guard = self.writer.lock().await;
            let writer = guard
                .as_mut()
                .ok_or_else(|| GatewayError::protocol("stdio", "not connected"))?;
            if let Err(e) = writer.write_all(&line).await {
                self.pending.remove(&id);
                return Err(GatewayError::Io(e));
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&id);
                Err(GatewayError::protocol("stdio", "response channel closed"))
            }
        }
    }
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn connect(&self) -> GatewayResult<Value> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(ProcStdio::piped())
            .stdout(ProcStdio::piped())
            .stderr(ProcStdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        *self.writer.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);

        let pending = self.pending.clone();
        let notif_tx = self.notif_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if let Some(id) = value.get("id").and_then(|v| v.as_i64()) {
                    if let Some((_, tx)) = pending.remove(&id) {
                        let _ = tx.send(outcome_from_value(value, "stdio"));
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
        });

        self.call("initialize", serde_json::json!({}), Duration::from_secs(30))
            .await
    }

    async fn list_page(&self, method: &str, cursor: Option<&str>) -> GatewayResult<ListPage> {
        let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
        let result = self.request(method, params).await?;
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
        tokio::time::timeout(timeout, self.request(method, Some(params)))
            .await
            .map_err(|_| GatewayError::timeout("stdio", method, timeout.as_millis() as u64))?
    }

    fn notifications(&self) -> mpsc::Receiver<BackendNotification> {
        self.notif_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn is_connected(&self) -> bool {
        self.child.lock().await.is_some()
    }

    async fn disconnect(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.writer.lock().await.take();
    }
}

/// Pull a `result`/`error` outcome out of a raw response line without
/// round-tripping through the typed envelope.
fn outcome_from_value(value: Value, backend_id: &str) -> GatewayResult<Value> {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("backend error")
            .to_string();
        Err(GatewayError::backend_error(backend_id, code, message))
    } else {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }
}
