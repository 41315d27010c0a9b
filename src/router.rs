//! Dispatches a namespaced client request to its owning backend and maps
//! the result back onto the gateway-facing surface (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::instrument;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::identifier::{self, BackendId, CapabilityKind};
use crate::metrics::Metrics;
use crate::pool::TransportPool;
use crate::registry::Registry;
use crate::subscription::SubscriptionManager;
use crate::transport::BackendTransport;

pub struct Router {
    registry: Arc<Registry>,
    pool: Arc<TransportPool>,
    subscriptions: Arc<SubscriptionManager>,
    config: Arc<GatewayConfig>,
    metrics: Arc<Metrics>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        pool: Arc<TransportPool>,
        subscriptions: Arc<SubscriptionManager>,
        config: Arc<GatewayConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            pool,
            subscriptions,
            config,
            metrics,
        }
    }

    #[instrument(skip(self, args))]
    pub async fn call_tool(&self, namespaced_name: &str, args: Value) -> GatewayResult<Value> {
        let (backend_id, original_name) = self
            .registry
            .resolve(CapabilityKind::Tools, namespaced_name)
            .ok_or_else(|| GatewayError::not_found("tools", namespaced_name))?;

        let (transport, timeout) = self.transport_and_timeout(&backend_id).await?;
        let args = self.maybe_normalize_paths(&backend_id, args);

        let params = serde_json::json!({ "name": original_name, "arguments": args });
        let result = transport.call("tools/call", params, timeout).await;
        self.metrics.tool_call(backend_id.as_str(), result.is_ok());
        let result = result?;
        self.enforce_size_limit(&backend_id, &result)?;
        Ok(self.renamespace_resource_uris(&backend_id, result))
    }

    #[instrument(skip(self, args))]
    pub async fn get_prompt(&self, namespaced_name: &str, args: Value) -> GatewayResult<Value> {
        let (backend_id, original_name) = self
            .registry
            .resolve(CapabilityKind::Prompts, namespaced_name)
            .ok_or_else(|| GatewayError::not_found("prompts", namespaced_name))?;

        let (transport, timeout) = self.transport_and_timeout(&backend_id).await?;
        let params = serde_json::json!({ "name": original_name, "arguments": args });
        let result = transport.call("prompts/get", params, timeout).await?;
        self.enforce_size_limit(&backend_id, &result)?;
        Ok(self.renamespace_resource_uris(&backend_id, result))
    }

    #[instrument(skip(self))]
    pub async fn read_resource(&self, namespaced_uri: &str) -> GatewayResult<Value> {
        let (backend_id, original_uri) = self
            .registry
            .resolve_uri(namespaced_uri)
            .ok_or_else(|| GatewayError::not_found("resources", namespaced_uri))?;

        let (transport, timeout) = self.transport_and_timeout(&backend_id).await?;
        let params = serde_json::json!({ "uri": original_uri });
        let result = transport.call("resources/read", params, timeout).await;
        let mime = result
            .as_ref()
            .ok()
            .and_then(|v| v.get("mimeType"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        self.metrics.resource_read(backend_id.as_str(), &mime, result.is_ok());
        let result = result?;
        self.enforce_size_limit(&backend_id, &result)?;
        Ok(self.renamespace_resource_uris(&backend_id, result))
    }

    pub async fn subscribe(&self, client_id: &str, namespaced_uri: &str) -> GatewayResult<()> {
        let (backend_id, original_uri) = self
            .registry
            .resolve_uri(namespaced_uri)
            .ok_or_else(|| GatewayError::not_found("resources", namespaced_uri))?;
        let transport = self.backend_transport(&backend_id).await?;
        self.subscriptions
            .subscribe(client_id, namespaced_uri, &backend_id, &original_uri, transport.as_ref())
            .await?;
        self.metrics.subscription_added();
        Ok(())
    }

    pub async fn unsubscribe(&self, client_id: &str, namespaced_uri: &str) -> GatewayResult<()> {
        let backend_id = self
            .subscriptions
            .backend_for(client_id, namespaced_uri)
            .ok_or_else(|| GatewayError::not_found("subscription", namespaced_uri))?;
        let transport = self.backend_transport(&backend_id).await.ok();
        if self
            .subscriptions
            .unsubscribe(client_id, namespaced_uri, transport.as_deref())
            .await
        {
            self.metrics.subscription_removed();
        }
        Ok(())
    }

    /// Release every subscription belonging to a client whose session just
    /// ended (spec §3 "Subscriptions are destroyed on... client
    /// disconnect"). Best-effort: only already-connected backends are used
    /// for the paired backend unsubscribe call, never a fresh connect.
    pub async fn disconnect_client(&self, client_id: &str) {
        let pool = self.pool.clone();
        self.subscriptions
            .drop_client(client_id, move |backend_id| {
                let pool = pool.clone();
                async move { pool.get_if_connected(&backend_id) }
            })
            .await;
    }

    async fn transport_and_timeout(
        &self,
        backend_id: &BackendId,
    ) -> GatewayResult<(Arc<dyn BackendTransport>, Duration)> {
        let transport = self.backend_transport(backend_id).await?;
        Ok((transport, self.config.policies.default_timeout()))
    }

    async fn backend_transport(&self, backend_id: &BackendId) -> GatewayResult<Arc<dyn BackendTransport>> {
        let def = self
            .config
            .servers
            .iter()
            .find(|s| s.id == backend_id.as_str())
            .map(|s| s.transport.clone())
            .ok_or_else(|| GatewayError::backend_unavailable(backend_id.as_str(), "backend not configured"))?;
        self.pool.get(backend_id, &def).await
    }

    fn enforce_size_limit(&self, backend_id: &BackendId, value: &Value) -> GatewayResult<()> {
        let size = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
        let limit = self.config.policies.output_size_limit_bytes;
        if size > limit {
            return Err(GatewayError::payload_too_large(backend_id.as_str(), size));
        }
        Ok(())
    }

    /// Walks a result's embedded resource URIs and re-namespaces them so
    /// clients never see a backend's native URI (spec §4.4 point 5).
    fn renamespace_resource_uris(&self, backend_id: &BackendId, value: Value) -> Value {
        match value {
            Value::Object(mut map) => {
                if let Some(Value::String(uri)) = map.get("uri").cloned() {
                    map.insert("uri".to_string(), Value::String(identifier::namespace_uri(backend_id, &uri)));
                }
                for (_, v) in map.iter_mut() {
                    *v = self.renamespace_resource_uris(backend_id, v.take());
                }
                Value::Object(map)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| self.renamespace_resource_uris(backend_id, v))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Rewrites recognizable Windows-style path strings to forward-slash
    /// form, recursively, when enabled for this backend (spec §4.4 point
    /// 3). Only leaf string values are ever mutated.
    fn maybe_normalize_paths(&self, backend_id: &BackendId, args: Value) -> Value {
        let enabled = self
            .config
            .servers
            .iter()
            .find(|s| s.id == backend_id.as_str())
            .map(|s| s.normalize_paths.unwrap_or(self.config.policies.normalize_paths))
            .unwrap_or(self.config.policies.normalize_paths);
        if !enabled {
            return args;
        }
        normalize_value(args)
    }
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_path_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Recognizes `[A-Z]:\...` and rewrites backslashes to forward slashes.
fn normalize_path_string(s: &str) -> String {
    let looks_like_windows_path = {
        let mut chars = s.chars();
        matches!(
            (chars.next(), chars.next(), chars.next()),
            (Some(d), Some(':'), Some('\\')) if d.is_ascii_alphabetic()
        )
    };
    if looks_like_windows_path {
        s.replace('\\', "/")
    } else {
        s.to_string()
    }
}
