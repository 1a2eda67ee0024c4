//! txtsync: continuous mirroring of a local text tree onto a remote host
//!
//! Connects over SSH, launches the agent in the remote directory,
//! reconciles both indexes by checksum, then watches the local tree and
//! ships character-level deltas for every edit.

mod reconcile;
mod watcher;

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use txtsync_core::{scan, IgnorePolicy};
use txtsync_transport::SshTransport;

use reconcile::Reconciler;
use watcher::ClientWatcher;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "txtsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Mirror a local tree of text files onto a remote host over SSH")]
#[command(long_about = r#"
txtsync keeps a local directory of text files byte-identical with a
directory on a remote host.

Startup reconciles both sides by CRC-64 index: files missing on one side
are copied whole, and content that diverged on both sides aborts the run
for a human to sort out. After that, edits are watched, debounced, and
shipped as compact character-level deltas.

Example:
  txtsync --addr devbox --remote work/project --local ~/project
"#)]
struct Cli {
    /// Server host to sync with
    #[arg(long)]
    addr: String,

    /// Working directory on the server
    #[arg(long)]
    remote: String,

    /// Local directory to mirror
    #[arg(long)]
    local: PathBuf,

    /// SSH user (defaults to the invoking user)
    #[arg(long)]
    user: Option<String>,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Debounce window in milliseconds
    #[arg(long, default_value_t = 200)]
    debounce: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let user = match cli.user {
        Some(user) => user,
        None => std::env::var("USER").map_err(|_| eyre!("--user not given and $USER is unset"))?,
    };

    let policy = IgnorePolicy::default();

    info!("indexing {}", cli.local.display());
    let mut cache = scan::build_cache(&cli.local, &policy)?;
    info!("{} tracked file(s)", cache.len());

    let transport = SshTransport::connect(&cli.addr, cli.port, &user).await?;
    let mut session = transport.start_session(&cli.remote).await?;

    let mut reconciler = Reconciler::new(&mut session, &mut cache, &cli.local);
    reconciler.auto_resolve().await?;
    reconciler.assert_in_sync().await?;
    info!("startup reconciliation complete");

    let (stop_tx, stop_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
        let _ = stop_tx.send(()).await;
    });

    ClientWatcher::new(session, cache, policy, cli.local)
        .with_debounce(std::time::Duration::from_millis(cli.debounce))
        .run(stop_rx)
        .await?;

    transport.disconnect().await?;
    Ok(())
}
