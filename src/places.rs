//! Map search: one lookup per search term, storing the top result.

use core::time::Duration;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::{
    db::Gateway,
    extract::first_text,
    record::PlaceCandidate,
    scheduler::Cancel,
    scrape::Session,
};

pub const SEARCH_BASE: &str = "https://www.google.com/maps/search/";
const PANEL: &str = r#"div[role="main"]"#;

pub const DEFAULT_TERMS: [&str; 7] = [
    "Eiffel Tower Paris",
    "Statue of Liberty New York",
    "British Museum London",
    "Colosseum Rome",
    "Sydney Opera House",
    "Central Park New York",
    "Invalid Place Name XYZ123",
];

static COORDS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(-?\d+\.\d+),(-?\d+\.\d+)").unwrap());

struct Selectors {
    name: Selector,
    address: Selector,
    address_button: Selector,
    phone: Selector,
    phone_button: Selector,
    category: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| {
    let sel = |s: &str| Selector::parse(s).unwrap();
    Selectors {
        name: sel("h1"),
        address: sel(r#"[data-item-id="address"]"#),
        address_button: sel(r#"button[data-tooltip*="address"] > div > div:nth-child(1)"#),
        phone: sel(r#"[data-item-id*="phone"]"#),
        phone_button: sel(r#"button[data-tooltip*="phone"] > div > div:nth-child(1)"#),
        category: sel(r#"button[jsaction*="category"]"#),
    }
});

#[derive(Debug, Clone, clap::Args)]
pub struct SearchConfig {
    #[arg(long, default_value_t = 60)]
    pub navigation_timeout_secs: u64,

    /// How long to wait for the results panel before reading whatever is there
    #[arg(long, default_value_t = 20)]
    pub panel_timeout_secs: u64,

    /// Pause before reading the URL, which carries the coordinates once settled
    #[arg(long, default_value_t = 1500)]
    pub settle_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub min_delay_ms: u64,

    #[arg(long, default_value_t = 3000)]
    pub max_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_secs: 60,
            panel_timeout_secs: 20,
            settle_ms: 1500,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
        }
    }
}

impl SearchConfig {
    fn random_delay(&self) -> Duration {
        let (lo, hi) = (
            self.min_delay_ms.min(self.max_delay_ms),
            self.min_delay_ms.max(self.max_delay_ms),
        );
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchReport {
    pub searched: usize,
    pub stored: usize,
    /// Searches that found neither a name nor an address.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub fn search_url(term: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(SEARCH_BASE)?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("{SEARCH_BASE} cannot carry a path"))?
        .pop_if_empty()
        .push(term);
    Ok(url)
}

/// `(latitude, longitude)` from the `@lat,lng` part of a map URL.
pub fn parse_coordinates(url: &str) -> Option<(f64, f64)> {
    let cap = COORDS.captures(url)?;
    Some((cap[1].parse().ok()?, cap[2].parse().ok()?))
}

/// Naive guess: the last part of a multi-part address.
pub fn guess_country(address: &str) -> Option<String> {
    let parts = address.split(", ").collect::<Vec<_>>();
    if parts.len() < 2 {
        return None;
    }
    parts
        .last()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Build a place from the results panel HTML and the page URL.
pub fn extract_place(panel_html: &str, url: &str, term: &str) -> PlaceCandidate {
    let fragment = Html::parse_fragment(panel_html);
    let root = fragment.root_element();

    let address = first_text(root, &[&SEL.address, &SEL.address_button]);
    let (latitude, longitude) = parse_coordinates(url).unzip();

    PlaceCandidate {
        search_term: term.to_owned(),
        name: first_text(root, &[&SEL.name]),
        country: address.as_deref().and_then(guess_country),
        address,
        latitude,
        longitude,
        category: first_text(root, &[&SEL.category]),
        phone: first_text(root, &[&SEL.phone, &SEL.phone_button]),
    }
}

/// Look up every term in turn on `session`, which is closed afterwards.
pub async fn search<S: Session>(
    session: S,
    gateway: &Gateway,
    terms: &[String],
    config: &SearchConfig,
    cancel: Cancel,
) -> SearchReport {
    let mut report = SearchReport::default();

    for (i, term) in terms.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        tracing::info!(target: "places", "searching for \x1b[1;36m{term}\x1b[0m ...");
        report.searched += 1;
        match search_term(&session, gateway, term, config).await {
            Ok(Some(id)) => {
                tracing::info!(target: "places", "stored {term:?} as #{id}");
                report.stored += 1;
            }
            Ok(None) => {
                tracing::info!(target: "places", "nothing usable for {term:?}, skipping");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::error!(target: "places", "searching {term:?} failed: {e:#}");
                report.failed += 1;
            }
        }

        if i + 1 < terms.len() {
            let delay = config.random_delay();
            tracing::debug!(target: "places", "waiting {delay:?} ...");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {}
            }
        }
    }

    session.close().await;
    tracing::info!(
        target: "places",
        "search finished: \x1b[1;32m{}\x1b[0m stored, {} skipped, {} failed",
        report.stored,
        report.skipped,
        report.failed,
    );
    report
}

async fn search_term<S: Session>(
    session: &S,
    gateway: &Gateway,
    term: &str,
    config: &SearchConfig,
) -> anyhow::Result<Option<i64>> {
    let url = search_url(term)?;
    session
        .navigate(url.as_str(), Duration::from_secs(config.navigation_timeout_secs))
        .await?;

    if let Err(e) = session
        .wait_for(PANEL, Duration::from_secs(config.panel_timeout_secs))
        .await
    {
        tracing::warn!(target: "places", "results panel missing for {term:?}: {e:#}");
    }

    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;

    let panel = session
        .rendered(PANEL)
        .await?
        .into_iter()
        .find_map(Result::ok)
        .unwrap_or_default();
    let current = session.current_url().await?;

    let place = extract_place(&panel, &current, term);
    if !place.is_storable() {
        return Ok(None);
    }
    Ok(Some(gateway.insert_place(&place).await?))
}
