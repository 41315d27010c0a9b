//! Plain HTTP POST backend transport (spec §4.1, §6.2): one request per
//! call, no persistent connection state beyond the `reqwest::Client`'s
//! own pool.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{BackendNotification, BackendTransport, ListPage};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{JsonRpcRequest, JsonRpcVersion, RequestId};

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
    next_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(url: String, auth_token: Option<String>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        Ok(Self {
            client,
            url,
            auth_token,
            next_id: AtomicI64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> GatewayResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        };

        let mut builder = self.client.post(&self.url).json(&req).timeout(timeout);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::backend_unavailable(&self.url, e.to_string()))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::protocol(&self.url, e.to_string()))?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("backend error")
                .to_string();
            Err(GatewayError::backend_error(&self.url, code, message))
        } else {
            Ok(body.get("result").cloned().unwrap_or(Value::Null))
        }
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
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
        // Plain request/response HTTP has no push channel; `list_changed`
        // style updates arrive only via polling re-syncs in this
        // transport (the `sse` variant is the one with a live
        // notification stream).
        mpsc::channel(1).1
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn disconnect(&self) {}
}
