//! poststash CLI
//!
//! `poststash search [--days N]` backfills posts matching the configured
//! hashtags via paginated historical search; `poststash listen` streams
//! matching posts as they are published. Both archive into the stash
//! directory, one JSON file per post.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::info;

use poststash::config::{read_credentials, read_terms};
use poststash::listen::run_listen;
use poststash::provider::rest::{api_base, ApiClient};
use poststash::provider::stream::{stream_base, WsPostStream};
use poststash::search::{run_batches, StopAfter};
use poststash::stash::FileStash;

#[derive(Parser, Debug)]
#[command(name = "poststash")]
#[command(about = "Archive social posts matching configured search terms")]
struct Args {
    /// Directory holding the .auth credentials and hashtags.list
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Directory where posts are archived
    #[arg(long, default_value = "posts")]
    stash: PathBuf,

    /// Partition stored posts by author id
    #[arg(long)]
    by_author: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backfill posts via paginated historical search
    Search {
        /// How far back to search, in days (default: no limit)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Stream matching posts as they are published, until Ctrl-C
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("poststash=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut stash = FileStash::open(&args.stash, args.by_author, true)?;
    info!(
        stash = %args.stash.display(),
        posts = stash.len(),
        by_author = args.by_author,
        "stash ready"
    );

    let credentials = read_credentials(&args.config)?;
    let terms = read_terms(&args.config)?;
    info!(terms = terms.len(), "loaded search terms");

    // Ctrl-C flips the shutdown flag; the loops honor it at their next
    // suspension point.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let client = ApiClient::connect(&credentials, api_base()).await?;

    match args.command {
        Commands::Search { days } => {
            let stop = days.map(StopAfter::days).unwrap_or(StopAfter::Unbounded);
            run_batches(&client, &mut stash, &terms, stop, &mut shutdown_rx).await?;
        }
        Commands::Listen => {
            let mut stream = WsPostStream::connect(client.token(), &stream_base(), &terms).await?;
            run_listen(&mut stream, &mut stash, &mut shutdown_rx).await?;
        }
    }

    info!(posts = stash.len(), "done");
    Ok(())
}
