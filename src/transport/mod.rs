//! `BackendTransport`: one bidirectional MCP client session to a single
//! backend (spec §4.1). Transport variants share this trait object so the
//! rest of the gateway never needs to know which wire format a given
//! backend speaks.

#[cfg(feature = "http-backend")]
mod http;
#[cfg(feature = "http-backend")]
mod sse;
mod stdio;

#[cfg(feature = "http-backend")]
pub use http::HttpTransport;
#[cfg(feature = "http-backend")]
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::TransportDef;
use crate::error::{GatewayError, GatewayResult};

/// A single page of a backend `list*` call.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// An unsolicited message pushed by a backend: a notification method
/// name plus its raw params.
#[derive(Debug, Clone)]
pub struct BackendNotification {
    pub method: String,
    pub params: Option<Value>,
}

/// One connected session to a backend MCP server.
///
/// Implementations own their own request/response correlation; callers
/// never see raw JSON-RPC ids. `connect` MUST run the MCP `initialize`
/// handshake and return the backend's advertised capabilities before any
/// other method is called.
#[async_trait]
pub trait BackendTransport: Send + Sync + std::fmt::Debug {
    /// Perform the initialize handshake; returns the backend's raw
    /// `capabilities` object.
    async fn connect(&self) -> GatewayResult<Value>;

    /// Page through a list endpoint once (`method` is one of
    /// `tools/list`, `prompts/list`, `resources/list`,
    /// `resources/templates/list`). Callers drive pagination by feeding
    /// back `next_cursor` until it is `None`.
    async fn list_page(&self, method: &str, cursor: Option<&str>) -> GatewayResult<ListPage>;

    /// A one-shot request: `tools/call`, `prompts/get`, `resources/read`,
    /// `resources/subscribe`, `resources/unsubscribe`, or any other
    /// non-list MCP method.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value>;

    /// A channel of unsolicited backend notifications, in arrival order.
    /// Returns `None` if `connect` has not yet succeeded.
    fn notifications(&self) -> mpsc::Receiver<BackendNotification>;

    /// Whether the session is still usable.
    async fn is_connected(&self) -> bool;

    /// Tear the session down.
    async fn disconnect(&self);
}

/// Maps a list method name to the array field it returns, shared by all
/// transport variants.
pub(crate) fn items_key(method: &str) -> &'static str {
    match method {
        "tools/list" => "tools",
        "prompts/list" => "prompts",
        "resources/list" => "resources",
        "resources/templates/list" => "resourceTemplates",
        _ => "items",
    }
}

/// Build the transport matching a backend's configured kind. Does not
/// connect — callers drive `connect()` themselves so the `TransportPool`
/// can apply its thundering-herd guard around that suspension point.
pub fn build(def: &TransportDef) -> GatewayResult<Box<dyn BackendTransport>> {
    match def {
        TransportDef::Stdio { command, args, env } => {
            Ok(Box::new(StdioTransport::new(command.clone(), args.clone(), env.clone())))
        }
        #[cfg(feature = "http-backend")]
        TransportDef::Http { url, auth_token } => {
            Ok(Box::new(HttpTransport::new(url.clone(), auth_token.clone())?))
        }
        #[cfg(feature = "http-backend")]
        TransportDef::Sse { url, auth_token } => {
            Ok(Box::new(SseTransport::new(url.clone(), auth_token.clone())?))
        }
        #[cfg(not(feature = "http-backend"))]
        TransportDef::Http { .. } | TransportDef::Sse { .. } => Err(GatewayError::configuration(
            "http/sse backend transports require the 'http-backend' feature",
        )),
    }
}
