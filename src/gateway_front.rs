//! The thin MCP server surface exposed to clients (spec §4.7, §6.1).
//! Serves `*/list` from the Registry's cache, forwards mutating calls to
//! the Router, and exposes the synthetic meta tools/prompts/resources
//! that operate against the Registry snapshot directly — they never touch
//! a backend.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::identifier::CapabilityKind;
use crate::protocol::{JsonRpcError, JsonRpcOutcome, JsonRpcResponse, JsonRpcVersion, RequestId};
use crate::registry::Registry;
use crate::router::Router;
use crate::subscription::SubscriptionManager;

pub struct GatewayFront {
    registry: Arc<Registry>,
    router: Arc<Router>,
    subscriptions: Arc<SubscriptionManager>,
}

impl GatewayFront {
    pub fn new(registry: Arc<Registry>, router: Arc<Router>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            registry,
            router,
            subscriptions,
        }
    }

    pub fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {},
                "prompts": {},
                "resources": { "subscribe": true },
            },
            "serverInfo": { "name": "goblin", "version": env!("CARGO_PKG_VERSION") },
        })
    }

    /// Handle one client-facing JSON-RPC request, producing its response
    /// envelope directly (errors are already mapped to `JsonRpcError`).
    pub async fn handle(&self, client_id: &str, method: &str, id: RequestId, params: Value) -> JsonRpcResponse {
        let outcome = self.dispatch(client_id, method, params).await;
        let outcome = match outcome {
            Ok(result) => JsonRpcOutcome::Result { result },
            Err(e) => JsonRpcOutcome::Error {
                error: JsonRpcError {
                    code: e.wire_code(),
                    message: e.sanitize(),
                    data: None,
                },
            },
        };
        JsonRpcResponse {
            jsonrpc: JsonRpcVersion,
            id,
            outcome,
        }
    }

    async fn dispatch(&self, client_id: &str, method: &str, params: Value) -> GatewayResult<Value> {
        match method {
            "initialize" => Ok(self.initialize_result()),
            "tools/list" => self.list(CapabilityKind::Tools, &params),
            "prompts/list" => self.list(CapabilityKind::Prompts, &params),
            "resources/list" => self.list(CapabilityKind::Resources, &params),
            "resources/templates/list" => self.list_templates(),
            "tools/call" => self.call_tool(&params).await,
            "prompts/get" => self.get_prompt(&params).await,
            "resources/read" => self.read_resource(&params).await,
            "resources/subscribe" => {
                let uri = require_str(&params, "uri")?;
                self.subscriptions_subscribe(client_id, uri).await
            }
            "resources/unsubscribe" => {
                let uri = require_str(&params, "uri")?;
                self.subscriptions_unsubscribe(client_id, uri).await
            }
            other => Err(GatewayError::not_found("method", other)),
        }
    }

    fn list(&self, kind: CapabilityKind, params: &Value) -> GatewayResult<Value> {
        let cursor = params.get("cursor").and_then(Value::as_str).and_then(|s| s.parse::<usize>().ok());
        let entries = self.registry.snapshot(kind);
        Ok(paginate(kind.as_str(), &entries, cursor, |e| {
            let mut m = e.metadata.clone();
            if let Value::Object(map) = &mut m {
                map.insert("name".to_string(), Value::String(e.namespaced_id.clone()));
            }
            m
        }))
    }

    fn list_templates(&self) -> GatewayResult<Value> {
        let templates = self.registry.snapshot_templates();
        let items: Vec<Value> = templates
            .into_iter()
            .map(|t| {
                let mut m = t.metadata;
                if let Value::Object(map) = &mut m {
                    map.insert("uriTemplate".to_string(), Value::String(t.namespaced_template));
                }
                m
            })
            .collect();
        Ok(json!({ "resourceTemplates": items }))
    }

    async fn call_tool(&self, params: &Value) -> GatewayResult<Value> {
        let name = require_str(params, "name")?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        if let Some(result) = self.meta_tool(name, &args)? {
            return Ok(result);
        }
        self.router.call_tool(name, args).await
    }

    async fn get_prompt(&self, params: &Value) -> GatewayResult<Value> {
        let name = require_str(params, "name")?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        self.router.get_prompt(name, args).await
    }

    async fn read_resource(&self, params: &Value) -> GatewayResult<Value> {
        let uri = require_str(params, "uri")?;
        self.router.read_resource(uri).await
    }

    async fn subscriptions_subscribe(&self, client_id: &str, uri: &str) -> GatewayResult<Value> {
        self.router.subscribe(client_id, uri).await?;
        Ok(Value::Null)
    }

    async fn subscriptions_unsubscribe(&self, client_id: &str, uri: &str) -> GatewayResult<Value> {
        self.router.unsubscribe(client_id, uri).await?;
        Ok(Value::Null)
    }

    /// Meta tools (spec §6.1): `catalog_*`/`describe_*`/`search_*` per
    /// kind, plus `catalog_resource_templates`. Returns `Ok(None)` when
    /// `name` isn't a recognized meta tool, so the caller falls through to
    /// the Router.
    fn meta_tool(&self, name: &str, args: &Value) -> GatewayResult<Option<Value>> {
        let result = match name {
            "catalog_tools" => Some(self.catalog(CapabilityKind::Tools)),
            "catalog_prompts" => Some(self.catalog(CapabilityKind::Prompts)),
            "catalog_resources" => Some(self.catalog(CapabilityKind::Resources)),
            "catalog_resource_templates" => Some(self.list_templates()?),
            "describe_tool" => Some(self.describe(CapabilityKind::Tools, args)?),
            "describe_prompt" => Some(self.describe(CapabilityKind::Prompts, args)?),
            "describe_resource" => Some(self.describe(CapabilityKind::Resources, args)?),
            "search_tools" => Some(self.search(CapabilityKind::Tools, args)),
            "search_prompts" => Some(self.search(CapabilityKind::Prompts, args)),
            "search_resources" => Some(self.search(CapabilityKind::Resources, args)),
            _ => None,
        };
        Ok(result)
    }

    fn catalog(&self, kind: CapabilityKind) -> Value {
        let entries = self.registry.snapshot(kind);
        json!({ "entries": entries.iter().map(|e| e.namespaced_id.clone()).collect::<Vec<_>>() })
    }

    fn describe(&self, kind: CapabilityKind, args: &Value) -> GatewayResult<Value> {
        let id = require_str(args, "name").or_else(|_| require_str(args, "id"))?;
        let entries = self.registry.snapshot(kind);
        entries
            .into_iter()
            .find(|e| e.namespaced_id == id)
            .map(|e| e.metadata)
            .ok_or_else(|| GatewayError::not_found(kind.as_str(), id))
    }

    fn search(&self, kind: CapabilityKind, args: &Value) -> Value {
        let query = args.get("query").and_then(Value::as_str).unwrap_or("").to_lowercase();
        let server_filter = args.get("serverId").and_then(Value::as_str);
        let mime_filter = args.get("mimeType").and_then(Value::as_str);

        let mut matches: Vec<(u8, String)> = self
            .registry
            .snapshot(kind)
            .into_iter()
            .filter(|e| server_filter.is_none_or(|s| e.backend_id.as_str() == s))
            .filter(|e| {
                mime_filter.is_none_or(|m| {
                    e.metadata.get("mimeType").and_then(Value::as_str) == Some(m)
                })
            })
            .filter_map(|e| {
                let name = e.metadata.get("name").and_then(Value::as_str).unwrap_or(&e.original_id).to_lowercase();
                let description = e
                    .metadata
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                relevance(&query, &name, &description).map(|rank| (rank, e.namespaced_id))
            })
            .collect();

        matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        json!({ "results": matches.into_iter().map(|(_, id)| id).collect::<Vec<_>>() })
    }
}

/// Lower rank = more relevant: exact match (0) > prefix match (1) >
/// contains match (2). `None` means the query doesn't match at all. An
/// empty query matches everything at the lowest-priority rank.
fn relevance(query: &str, name: &str, description: &str) -> Option<u8> {
    if query.is_empty() {
        return Some(2);
    }
    if name == query {
        Some(0)
    } else if name.starts_with(query) {
        Some(1)
    } else if name.contains(query) || description.contains(query) {
        Some(2)
    } else {
        None
    }
}

fn paginate(
    key: &str,
    entries: &[crate::protocol::CatalogEntry],
    cursor: Option<usize>,
    render: impl Fn(&crate::protocol::CatalogEntry) -> Value,
) -> Value {
    const PAGE_SIZE: usize = 100;
    let start = cursor.unwrap_or(0);
    let end = (start + PAGE_SIZE).min(entries.len());
    let page: Vec<Value> = entries[start.min(entries.len())..end].iter().map(render).collect();
    let next_cursor = if end < entries.len() { Some(end.to_string()) } else { None };
    json!({ (key): page, "nextCursor": next_cursor })
}

fn require_str<'a>(params: &'a Value, field: &str) -> GatewayResult<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::protocol("client", format!("missing or non-string '{field}' parameter")))
}
