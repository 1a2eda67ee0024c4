//! txtsync-agent: remote peer for txtsync
//!
//! Launched by the client over SSH with the sync root as working
//! directory. Reads framed requests from stdin, writes responses to
//! stdout, logs to stderr. Takes no flags.

use std::io::{BufReader, BufWriter};

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use txtsync_core::{IgnorePolicy, ServerEngine};

#[derive(Parser)]
#[command(name = "txtsync-agent")]
#[command(version)]
#[command(about = "Remote agent for txtsync; serves the current directory")]
struct Cli {}

fn main() -> Result<()> {
    color_eyre::install()?;
    let Cli {} = Cli::parse();

    // stdout carries the wire protocol, so logging goes to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = std::env::current_dir()?;
    info!("txtsync-agent starting in {}", root.display());

    let mut engine = ServerEngine::new(&root, &IgnorePolicy::default())?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    engine.serve(BufReader::new(stdin.lock()), BufWriter::new(stdout.lock()))?;

    info!("txtsync-agent exiting");
    Ok(())
}
