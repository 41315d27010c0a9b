//! Command-line entry point: `goblin serve` and `goblin inspect` (spec
//! SPEC_FULL §6.7), plus tracing initialization from a `-v`/`-q` count.

mod inspect;
mod serve;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "goblin", version, about = "MCP gateway aggregating multiple backend servers into one catalog")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v, -vv, -vvv); repeatable.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but error-level logs.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a config file and start the gateway.
    Serve(serve::ServeArgs),
    /// Connect to a single backend, print its discovered capabilities, and exit.
    Inspect(inspect::InspectArgs),
}

impl Cli {
    /// Mirrors the verbosity-count convention used throughout the
    /// surrounding MCP tooling: `-q` forces error-only, 0 counts default to
    /// `info`, each `-v` drops one level further to `trace`.
    pub fn init_tracing(&self) {
        let directive = if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.init_tracing();
        match self.command {
            Command::Serve(args) => serve::run(args).await,
            Command::Inspect(args) => inspect::run(args).await,
        }
    }
}
