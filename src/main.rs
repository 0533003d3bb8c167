//! PlumFinder — Binary Entrypoint
//! Scrapes secondhand marketplaces for plum/purple accent decor, scores the
//! finds by color and freshness, and emails a daily digest of the top picks.
//!
//! Flags:
//!   --dry-run   scrape, score, and rank, but persist nothing and send no email
//!   --reset     wipe the seen-item store and exit
//!
//! See `README.md` for configuration.

use plumfinder::config::Config;
use plumfinder::tracker::ItemTracker;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plumfinder=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let reset = args.iter().any(|a| a == "--reset");

    let cfg = Config::from_env()?;

    if reset {
        let tracker = ItemTracker::open(&cfg.db_path)?;
        tracker.reset()?;
        tracing::info!("store reset complete");
        return Ok(());
    }

    plumfinder::pipeline::run(&cfg, dry_run).await
}
