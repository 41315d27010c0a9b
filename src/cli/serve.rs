//! `goblin serve`: load a config file, connect every enabled backend, and
//! run the gateway against a stdio client session until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcVersion};
use crate::Gateway;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the gateway's TOML configuration file.
    #[arg(short, long, default_value = "goblin.toml")]
    pub config: PathBuf,

    /// Serve over HTTP instead of stdio, binding this address (e.g.
    /// `127.0.0.1:8008`). Requires the `http-frontend` feature.
    #[cfg(feature = "http-frontend")]
    #[arg(long)]
    pub bind: Option<std::net::SocketAddr>,
}

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = Gateway::load_config(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    println!("{} goblin gateway starting", "==>".green().bold());
    let mut gateway = Gateway::new(config);
    gateway.start_backends().await;
    info!(
        backends = gateway.config.enabled_servers().count(),
        "gateway ready"
    );

    #[cfg(feature = "http-frontend")]
    if let Some(addr) = args.bind {
        return serve_http(gateway, addr).await;
    }

    serve_stdio(&mut gateway).await
}

/// Serves the gateway's client-facing surface over HTTP (spec §6's
/// frontend transport left open-ended beyond stdio): `POST /rpc` for
/// request/response calls, `GET /events/{client_id}` for the matching
/// `resources/updated` SSE stream.
#[cfg(feature = "http-frontend")]
async fn serve_http(mut gateway: Gateway, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let resource_updates = std::mem::replace(&mut gateway.resource_updates, tokio::sync::mpsc::channel(1).1);
    let gateway = Arc::new(gateway);
    let router = crate::http_frontend::router(gateway, resource_updates);

    info!(%addr, "serving MCP over HTTP");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Reads newline-delimited JSON-RPC requests from stdin, dispatches each
/// through the `GatewayFront`, and writes the response to stdout, while a
/// second task drains the gateway's `resources/updated` channel and pushes
/// notifications down the same stream (spec §4.7's "push resources/updated
/// notifications... to the right client session"). Both writers share one
/// mutex-guarded stdout handle so a notification can never interleave with
/// a partially-written response line.
async fn serve_stdio(gateway: &mut Gateway) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let stdout = Arc::new(AsyncMutex::new(tokio::io::stdout()));
    let client_id = "stdio-client";

    let notify_stdout = stdout.clone();
    let mut resource_updates = std::mem::replace(&mut gateway.resource_updates, tokio::sync::mpsc::channel(1).1);
    let notify_task = tokio::spawn(async move {
        while let Some(update) = resource_updates.recv().await {
            let notification = JsonRpcNotification {
                jsonrpc: JsonRpcVersion,
                method: "notifications/resources/updated".to_string(),
                params: Some(serde_json::json!({ "uri": update.namespaced_uri })),
            };
            if write_line(&notify_stdout, &notification).await.is_err() {
                break;
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed client request");
                continue;
            }
        };
        let response = gateway
            .front
            .handle(client_id, &request.method, request.id, request.params.unwrap_or(serde_json::Value::Null))
            .await;
        write_line(&stdout, &response).await?;
    }

    gateway.router.disconnect_client(client_id).await;
    notify_task.abort();
    Ok(())
}

async fn write_line<T: serde::Serialize>(stdout: &Arc<AsyncMutex<tokio::io::Stdout>>, value: &T) -> anyhow::Result<()> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    let mut stdout = stdout.lock().await;
    stdout.write_all(&payload).await?;
    stdout.flush().await?;
    Ok(())
}
