//! Wire-level JSON-RPC envelope and catalog entry shapes.
//!
//! MCP payload bodies (schemas, tool results, resource metadata) are
//! treated as opaque `serde_json::Value` end to end (spec §9, "Dynamic
//! schema shapes") — the gateway forwards them untouched except for
//! namespaced-identifier substitution, so there is no benefit in
//! reflecting their internal structure into Rust types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifier::{BackendId, CapabilityKind};

/// A minimal JSON-RPC 2.0 request envelope, used both for the
/// client-facing surface and for backend-facing calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response envelope — either a `result` or an `error`,
/// never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: JsonRpcOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcOutcome {
    Result { result: Value },
    Error { error: JsonRpcError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC notification: a request with no `id` and no expected reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct JsonRpcVersion;

impl serde::Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("2.0")
    }
}

impl<'de> serde::Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version '{s}'"
            )))
        }
    }
}

/// A JSON-RPC request id: number or string, per spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// A fully-namespaced entry in the aggregated catalog (spec §3
/// `CatalogEntry`). `metadata` is the backend's own JSON descriptor,
/// untouched apart from substituting namespaced identifiers the gateway
/// itself introduces on the outward-facing surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub kind: CapabilityKind,
    pub backend_id: BackendId,
    pub original_id: String,
    pub namespaced_id: String,
    pub metadata: Value,
}

/// A registered resource template, kept separately from plain resource
/// entries because it's matched structurally rather than by exact id
/// (spec §4.3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub backend_id: BackendId,
    pub uri_template: String,
    pub namespaced_template: String,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = JsonRpcRequest {
            jsonrpc: JsonRpcVersion,
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({"name": "fs_read_file"})),
        };
        let s = serde_json::to_string(&req).unwrap();
        assert!(s.contains("\"jsonrpc\":\"2.0\""));
        let back: JsonRpcRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(back.method, "tools/call");
    }

    #[test]
    fn error_outcome_round_trips() {
        let resp = JsonRpcResponse {
            jsonrpc: JsonRpcVersion,
            id: RequestId::String("abc".into()),
            outcome: JsonRpcOutcome::Error {
                error: JsonRpcError {
                    code: -32001,
                    message: "not found".into(),
                    data: None,
                },
            },
        };
        let s = serde_json::to_string(&resp).unwrap();
        let back: JsonRpcResponse = serde_json::from_str(&s).unwrap();
        assert!(matches!(back.outcome, JsonRpcOutcome::Error { .. }));
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let bad = r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#;
        assert!(serde_json::from_str::<JsonRpcRequest>(bad).is_err());
    }
}
