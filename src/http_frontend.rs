//! Optional HTTP surface for the gateway's client-facing side (feature
//! `http-frontend`): the same [`GatewayFront::handle`] dispatch the stdio
//! path drives (spec §4.7), reachable over `POST /rpc` for clients that
//! can't speak newline-delimited JSON-RPC on a pipe, plus a per-client
//! `GET /events/{client_id}` SSE stream for `resources/updated` pushes.
//!
//! This and `cli::serve`'s stdio loop are alternative frontends over the
//! same [`Gateway`]; a deployment picks one per process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{Stream, unfold};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::subscription::ResourceUpdate;
use crate::Gateway;

const CLIENT_ID_HEADER: &str = "x-goblin-client-id";

/// Re-routes the gateway's single `resource_updates` channel by
/// `client_id` to whichever HTTP client currently has an SSE stream open
/// for it, generalizing stdio's single implicit session to many
/// concurrently-connected clients (spec §4.5's fan-out, over HTTP).
#[derive(Clone)]
struct EventRouter {
    senders: Arc<DashMap<String, mpsc::Sender<ResourceUpdate>>>,
}

impl EventRouter {
    fn new() -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
        }
    }

    fn register(&self, client_id: &str) -> mpsc::Receiver<ResourceUpdate> {
        let (tx, rx) = mpsc::channel(64);
        self.senders.insert(client_id.to_string(), tx);
        rx
    }

    /// Drains the gateway-wide channel for the lifetime of the process.
    /// A client with no open SSE stream simply has its updates dropped —
    /// there's nowhere to deliver them until it reconnects.
    fn spawn_drain(&self, mut updates: mpsc::Receiver<ResourceUpdate>) {
        let senders = self.senders.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let tx = senders.get(&update.client_id).map(|entry| entry.clone());
                if let Some(tx) = tx {
                    let _ = tx.send(update).await;
                }
            }
        });
    }
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
    events: EventRouter,
}

/// Build the axum router for the gateway's HTTP frontend. Takes ownership
/// of `resource_updates`, so this and `cli::serve::run`'s stdio loop are
/// mutually exclusive consumers of one `Gateway`.
pub fn router(gateway: Arc<Gateway>, resource_updates: mpsc::Receiver<ResourceUpdate>) -> Router {
    let events = EventRouter::new();
    events.spawn_drain(resource_updates);
    let state = AppState { gateway, events };

    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/events/{client_id}", get(handle_events))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// A client's own id if it sent one back, otherwise a fresh one — the
/// first call a client makes mints the id it must echo on every
/// subsequent call (and on the SSE path) to keep its subscriptions and
/// event stream addressed to the same session.
fn client_id_of(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let client_id = client_id_of(&headers);
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("malformed JSON-RPC request: {e}")).into_response(),
    };

    let response: JsonRpcResponse = state
        .gateway
        .front
        .handle(
            &client_id,
            &request.method,
            request.id,
            request.params.unwrap_or(serde_json::Value::Null),
        )
        .await;

    let mut res = Json(response).into_response();
    if let Ok(value) = HeaderValue::from_str(&client_id) {
        res.headers_mut().insert(CLIENT_ID_HEADER, value);
    }
    res
}

async fn handle_events(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.events.register(&client_id);
    let stream = unfold(rx, |mut rx| async move {
        let update = rx.recv().await?;
        let event = Event::default()
            .event("resources/updated")
            .json_data(serde_json::json!({ "uri": update.namespaced_uri }))
            .unwrap_or_else(|_| Event::default());
        Some((Ok(event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_of_echoes_an_existing_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(client_id_of(&headers), "abc-123");
    }

    #[test]
    fn client_id_of_mints_a_fresh_uuid_when_absent() {
        let headers = HeaderMap::new();
        let first = client_id_of(&headers);
        let second = client_id_of(&headers);
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn client_id_of_mints_a_fresh_uuid_for_a_blank_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static(""));
        assert!(Uuid::parse_str(&client_id_of(&headers)).is_ok());
    }

    #[tokio::test]
    async fn event_router_delivers_only_to_the_registered_client() {
        let router = EventRouter::new();
        let (tx, rx) = mpsc::channel(8);
        router.spawn_drain(rx);
        let mut stream = router.register("client-a");

        tx.send(ResourceUpdate {
            client_id: "client-a".to_string(),
            namespaced_uri: "fs_file:///a".to_string(),
        })
        .await
        .unwrap();
        tx.send(ResourceUpdate {
            client_id: "client-b".to_string(),
            namespaced_uri: "fs_file:///b".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let delivered = stream.recv().await.unwrap();
        assert_eq!(delivered.namespaced_uri, "fs_file:///a");
        assert!(stream.recv().await.is_none());
    }
}
