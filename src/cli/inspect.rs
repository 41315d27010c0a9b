//! `goblin inspect`: connect to a single backend, print its advertised
//! capabilities and catalog, and exit. A debugging aid with no registry or
//! router wiring (spec SPEC_FULL §6.7).

use anyhow::Context;
use clap::{Args, ValueEnum};
use colored::Colorize;

use crate::config::TransportDef;
use crate::transport;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Transport kind to connect with.
    #[arg(long, value_enum)]
    pub backend: BackendKind,

    /// Command to spawn (stdio transport).
    #[arg(long)]
    pub cmd: Option<String>,

    /// Arguments to pass to the spawned command (stdio transport).
    #[arg(long, num_args = 0..)]
    pub arg: Vec<String>,

    /// URL to connect to (http/sse transport).
    #[arg(long)]
    pub url: Option<String>,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum BackendKind {
    Stdio,
    Http,
    Sse,
}

pub async fn run(args: InspectArgs) -> anyhow::Result<()> {
    let def = match args.backend {
        BackendKind::Stdio => TransportDef::Stdio {
            command: args.cmd.context("--cmd is required for stdio inspection")?,
            args: args.arg,
            env: Default::default(),
        },
        BackendKind::Http => TransportDef::Http {
            url: args.url.context("--url is required for http inspection")?,
            auth_token: None,
        },
        BackendKind::Sse => TransportDef::Sse {
            url: args.url.context("--url is required for sse inspection")?,
            auth_token: None,
        },
    };

    let transport = transport::build(&def)?;
    let capabilities = transport.connect().await.context("connecting to backend")?;
    println!("{} advertised capabilities:", "==>".green().bold());
    println!("{}", serde_json::to_string_pretty(&capabilities)?);

    for (label, method) in [
        ("tools", "tools/list"),
        ("prompts", "prompts/list"),
        ("resources", "resources/list"),
        ("resource templates", "resources/templates/list"),
    ] {
        match transport.list_page(method, None).await {
            Ok(page) => {
                println!("\n{} {} ({} items)", "==>".green().bold(), label, page.items.len());
                for item in &page.items {
                    println!("  - {}", serde_json::to_string(item)?);
                }
            }
            Err(e) => println!("\n{} {} unavailable: {e}", "==>".yellow().bold(), label),
        }
    }

    transport.disconnect().await;
    Ok(())
}
