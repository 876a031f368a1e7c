//! The scroll-and-collect loop.
//!
//! One run owns one [`Session`]: it loads the feed, waits for the first items,
//! then repeatedly reads everything rendered, stores what is new, scrolls and
//! pauses. Bad elements are counted and skipped; only failures that leave the
//! page unusable end the run early. The session is closed on every exit path.

use core::time::Duration;

use compact_str::CompactString;
use hashbrown::HashSet;
use serde::Serialize;
use url::Url;

use crate::{
    db::Gateway,
    extract::Extractor,
    record::{Extraction, Inserted, RejectReason},
    scheduler::Cancel,
    scrape::{Launch, Session},
};

pub mod defaults {
    pub const URL: &str = "https://www.reddit.com/r/all/";
    pub const SELECTOR: &str = "shreddit-post, div[data-testid='post-container']";
    pub const SCROLL_PIXELS: i64 = 500;
    pub const SCROLL_DURATION_MS: u64 = 750;
    pub const SCROLL_DELAY_MS: u64 = 3000;
    pub const MAX_SCROLLS: u32 = 100;
    pub const NAVIGATION_TIMEOUT_SECS: u64 = 90;
    pub const SELECTOR_TIMEOUT_SECS: u64 = 30;
}

#[derive(Debug, Clone, clap::Args)]
pub struct CollectConfig {
    /// Feed to scrape
    #[arg(long, env = "SSCR_URL", default_value = defaults::URL)]
    pub url: String,

    /// CSS selector matching one feed item
    #[arg(long, env = "SSCR_SELECTOR", default_value = defaults::SELECTOR)]
    pub selector: String,

    /// Pixels scrolled per iteration
    #[arg(long, env = "SSCR_SCROLL_PIXELS", default_value_t = defaults::SCROLL_PIXELS)]
    pub scroll_pixels: i64,

    /// Length of the scroll animation; 0 jumps instantly
    #[arg(long, default_value_t = defaults::SCROLL_DURATION_MS)]
    pub scroll_duration_ms: u64,

    /// Pause after each scroll so lazy content can render
    #[arg(long, env = "SSCR_SCROLL_DELAY_MS", default_value_t = defaults::SCROLL_DELAY_MS)]
    pub scroll_delay_ms: u64,

    /// Read and scroll this many times; 0 keeps going until cancelled
    #[arg(long, env = "SSCR_MAX_SCROLLS", default_value_t = defaults::MAX_SCROLLS)]
    pub max_scrolls: u32,

    #[arg(long, default_value_t = defaults::NAVIGATION_TIMEOUT_SECS)]
    pub navigation_timeout_secs: u64,

    #[arg(long, default_value_t = defaults::SELECTOR_TIMEOUT_SECS)]
    pub selector_timeout_secs: u64,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            url: defaults::URL.to_owned(),
            selector: defaults::SELECTOR.to_owned(),
            scroll_pixels: defaults::SCROLL_PIXELS,
            scroll_duration_ms: defaults::SCROLL_DURATION_MS,
            scroll_delay_ms: defaults::SCROLL_DELAY_MS,
            max_scrolls: defaults::MAX_SCROLLS,
            navigation_timeout_secs: defaults::NAVIGATION_TIMEOUT_SECS,
            selector_timeout_secs: defaults::SELECTOR_TIMEOUT_SECS,
        }
    }
}

impl CollectConfig {
    pub const fn scroll_duration(&self) -> Duration {
        Duration::from_millis(self.scroll_duration_ms)
    }

    pub const fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub const fn selector_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_timeout_secs)
    }

    /// `None` when the loop is unbounded.
    pub const fn scroll_budget(&self) -> Option<u32> {
        if self.max_scrolls == 0 {
            None
        } else {
            Some(self.max_scrolls)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejections {
    pub no_element: u64,
    pub missing_identifier: u64,
    pub missing_title: u64,
}

impl Rejections {
    const fn count(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::NoElement => self.no_element += 1,
            RejectReason::MissingIdentifier => self.missing_identifier += 1,
            RejectReason::MissingTitle => self.missing_title += 1,
        }
    }

    pub const fn total(&self) -> u64 {
        self.no_element + self.missing_identifier + self.missing_title
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub scrolls: u32,
    pub elements: u64,
    pub stored: u64,
    /// Already in the store before this run saw them.
    pub duplicates: u64,
    /// Seen earlier in this run.
    pub repeated: u64,
    pub unreadable: u64,
    pub store_errors: u64,
    pub rejected: Rejections,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid feed url {url:?}: {source}")]
    Url { url: String, source: url::ParseError },
    #[error("browser launch failed: {0:#}")]
    Launch(anyhow::Error),
    #[error("navigation failed: {0:#}")]
    Navigate(anyhow::Error),
    #[error("no element matched {selector:?} in time: {cause:#}")]
    Selector { selector: String, cause: anyhow::Error },
    #[error("browser stopped responding: {0:#}")]
    Browser(anyhow::Error),
}

/// Launch a browser and run one collection with it.
pub async fn harvest<L: Launch>(
    launcher: &L,
    gateway: &Gateway,
    config: &CollectConfig,
    cancel: Cancel,
) -> Result<RunReport, RunError> {
    tracing::info!(target: "collect", "launching browser ...");
    let session = launcher.launch().await.map_err(RunError::Launch)?;
    run(session, gateway, config, cancel).await
}

/// Run one collection on `session`, closing it afterwards whatever happens.
pub async fn run<S: Session>(
    session: S,
    gateway: &Gateway,
    config: &CollectConfig,
    cancel: Cancel,
) -> Result<RunReport, RunError> {
    let result = collect(&session, gateway, config, &cancel).await;
    session.close().await;

    match &result {
        Ok(report) => tracing::info!(
            target: "collect",
            "run {}: \x1b[1;32m{}\x1b[0m stored, {} duplicates, {} rejected, {} unreadable after {} scrolls",
            if report.cancelled { "cancelled" } else { "finished" },
            report.stored,
            report.duplicates,
            report.rejected.total(),
            report.unreadable,
            report.scrolls,
        ),
        Err(e) => tracing::error!(target: "collect", "run failed: {e}"),
    }

    result
}

async fn collect<S: Session>(
    session: &S,
    gateway: &Gateway,
    config: &CollectConfig,
    cancel: &Cancel,
) -> Result<RunReport, RunError> {
    let base = Url::parse(&config.url).map_err(|source| RunError::Url {
        url: config.url.clone(),
        source,
    })?;

    tracing::info!(target: "collect", "navigating to \x1b[1;34m{}\x1b[0m ...", config.url);
    session
        .navigate(&config.url, config.navigation_timeout())
        .await
        .map_err(RunError::Navigate)?;
    session
        .wait_for(&config.selector, config.selector_timeout())
        .await
        .map_err(|cause| RunError::Selector {
            selector: config.selector.clone(),
            cause,
        })?;

    // relative links resolve against where the browser actually landed
    let base = match session.current_url().await.map(|live| Url::parse(&live)) {
        Ok(Ok(live)) => live,
        _ => base,
    };
    let extractor = Extractor::new(base);

    let mut report = RunReport::default();
    let mut seen = HashSet::<CompactString>::new();

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if config.scroll_budget().is_some_and(|max| report.scrolls >= max) {
            break;
        }

        let rendered = session
            .rendered(&config.selector)
            .await
            .map_err(RunError::Browser)?;
        let fresh_before = report.stored;

        for html in rendered {
            report.elements += 1;
            let html = match html {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(target: "collect", "element unreadable: {e:#}");
                    report.unreadable += 1;
                    continue;
                }
            };

            let candidate = match extractor.extract(&html) {
                Extraction::Valid(candidate) => candidate,
                Extraction::Rejected { reason } => {
                    report.rejected.count(reason);
                    continue;
                }
            };

            if seen.contains(&candidate.external_id) {
                report.repeated += 1;
                continue;
            }

            match gateway.insert(&candidate).await {
                Ok(Inserted::Fresh) => {
                    report.stored += 1;
                    seen.insert(candidate.external_id);
                }
                Ok(Inserted::Duplicate) => {
                    report.duplicates += 1;
                    seen.insert(candidate.external_id);
                }
                Err(e) => {
                    tracing::warn!(target: "collect", "storing {} failed: {e}", candidate.external_id);
                    report.store_errors += 1;
                }
            }
        }

        tracing::info!(
            target: "collect",
            "pass #{}: \x1b[1;32m{}\x1b[0m new, {} seen so far",
            report.scrolls + 1,
            report.stored - fresh_before,
            seen.len(),
        );

        session
            .scroll_by(config.scroll_pixels, config.scroll_duration())
            .await
            .map_err(RunError::Browser)?;
        report.scrolls += 1;

        tokio::select! {
            () = tokio::time::sleep(config.scroll_delay()) => {}
            () = cancel.cancelled() => {}
        }
    }

    if let Ok(url) = session.current_url().await {
        tracing::debug!(target: "collect", "stopped at {url}");
    }

    Ok(report)
}
