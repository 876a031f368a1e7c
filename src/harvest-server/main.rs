use core::{num::NonZeroU32, time::Duration};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use sscr::{
    collect::CollectConfig,
    db::Gateway,
    scheduler::Scheduler,
    scrape::{BrowserArgs, Chrome},
    server::{AppState, PAGE_SIZE, router},
};

/// How long a cancelled run gets to release its browser on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serve stored records over HTTP and start scrape runs on request.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    #[arg(long, env = "SSCR_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// SQLite database file
    #[arg(long, env = "SSCR_DB", default_value = sscr::db::constants::PATH)]
    db: PathBuf,

    #[arg(long, env = "SSCR_PAGE_SIZE", default_value_t = PAGE_SIZE)]
    page_size: NonZeroU32,

    #[command(flatten)]
    browser: BrowserArgs,

    #[command(flatten)]
    collect: CollectConfig,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "server", "cannot listen for ctrl-c: {e}");
        return;
    }
    tracing::info!(target: "server", "interrupt received, shutting down ...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();
    let args = Args::parse();

    let gateway = Gateway::open(&args.db)?;
    let scheduler = Scheduler::new();
    let app = router(AppState {
        gateway,
        scheduler: Arc::clone(&scheduler),
        launcher: Arc::new(Chrome::from(args.browser)),
        config: Arc::new(args.collect),
        page_size: args.page_size,
    });

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(
        target: "server",
        "listening on \x1b[1;34mhttp://{}\x1b[0m",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if scheduler.cancel() {
        tracing::info!(target: "server", "waiting for the active run to release the browser ...");
        if tokio::time::timeout(SHUTDOWN_GRACE, scheduler.idle())
            .await
            .is_err()
        {
            tracing::warn!(target: "server", "run still busy after {SHUTDOWN_GRACE:?}, exiting anyway");
        }
    }

    Ok(())
}
