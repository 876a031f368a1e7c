use std::path::PathBuf;

use sscr::{
    collect::{CollectConfig, harvest},
    db::Gateway,
    scheduler::Cancel,
    scrape::{BrowserArgs, Chrome},
    server::PAGE_SIZE,
};

/// Run one scroll-and-collect pass in the terminal. Ctrl-C stops it after the
/// current batch.
#[derive(clap::Parser)]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(long, env = "SSCR_DB", default_value = sscr::db::constants::PATH)]
    db: PathBuf,

    #[command(flatten)]
    browser: BrowserArgs,

    #[command(flatten)]
    collect: CollectConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();
    let args = Args::parse();

    let gateway = Gateway::open(&args.db)?;

    let (stop, cancel) = Cancel::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, finishing the current batch ...");
            stop.send_replace(true);
        }
    });

    let report = harvest(&Chrome::from(args.browser), &gateway, &args.collect, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    for record in gateway.fetch_latest(PAGE_SIZE).await? {
        log::info!("latest: [{}] {} ({} points, {} comments)", record.external_id, record.title, record.score, record.comment_count);
    }

    Ok(())
}
