use std::path::PathBuf;

use sscr::{
    db::Gateway,
    places::{DEFAULT_TERMS, SearchConfig, search},
    scheduler::Cancel,
    scrape::{BrowserArgs, Chrome, Launch},
};

/// Look places up on the map site and store the top result of each search.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    /// Search terms; a few well-known landmarks when omitted
    terms: Vec<String>,

    /// SQLite database file
    #[arg(long, env = "SSCR_DB", default_value = sscr::db::constants::PATH)]
    db: PathBuf,

    #[command(flatten)]
    browser: BrowserArgs,

    #[command(flatten)]
    search: SearchConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();
    let args = Args::parse();

    let terms = if args.terms.is_empty() {
        DEFAULT_TERMS.map(ToOwned::to_owned).to_vec()
    } else {
        args.terms
    };

    let gateway = Gateway::open(&args.db)?;
    let session = Chrome::from(args.browser).launch().await?;

    let (stop, cancel) = Cancel::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, stopping after this search ...");
            stop.send_replace(true);
        }
    });

    let report = search(session, &gateway, &terms, &args.search, cancel).await;
    log::info!("{report:?}");

    Ok(())
}
