//! The browser automation boundary.
//!
//! Loops only talk to a [`Session`]; [`Chrome`] acquires real ones through
//! `headless_chrome`, whose blocking calls are pushed onto the blocking pool.

use core::future::Future;
use std::{sync::Arc, time::Duration};

use headless_chrome::{Browser, Tab};
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use tokio::task::spawn_blocking;

mod puppeteer;

pub use puppeteer::{first_tab, puppeteer};

pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// One controllable browser page.
pub trait Session: Send + Sync + 'static {
    fn navigate(&self, url: &str, timeout: Duration) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Resolves once `selector` matches something, or fails after `timeout`.
    fn wait_for(&self, selector: &str, timeout: Duration) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Outer HTML of every element currently matching `selector`. Reading a
    /// single element may fail without failing the whole query.
    fn rendered(
        &self,
        selector: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<anyhow::Result<String>>>> + Send;

    /// Scroll the viewport down; a zero `duration` jumps instantly.
    fn scroll_by(&self, pixels: i64, duration: Duration) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn current_url(&self) -> impl Future<Output = anyhow::Result<String>> + Send;

    /// Release the browser. Never fails; problems are logged.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Something that can hand out fresh sessions.
pub trait Launch: Send + Sync + 'static {
    type Session: Session;

    fn launch(&self) -> impl Future<Output = anyhow::Result<Self::Session>> + Send;
}

#[derive(Debug, Clone, clap::Args)]
pub struct BrowserArgs {
    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Proxy server handed to chrome, e.g. `http://127.0.0.1:8080`
    #[arg(long, env = "SSCR_PROXY")]
    pub proxy: Option<String>,

    /// Fixed user-agent instead of a random desktop one
    #[arg(long, env = "SSCR_USER_AGENT")]
    pub user_agent: Option<String>,
}

impl From<BrowserArgs> for Chrome {
    fn from(args: BrowserArgs) -> Self {
        Self {
            headless: !args.headed,
            proxy: args.proxy,
            user_agent: args.user_agent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chrome {
    pub headless: bool,
    pub proxy: Option<String>,
    /// Fixed user-agent; a random desktop one is picked when absent.
    pub user_agent: Option<String>,
}

impl Launch for Chrome {
    type Session = ChromeSession;

    async fn launch(&self) -> anyhow::Result<ChromeSession> {
        let Self {
            headless,
            proxy,
            user_agent,
        } = self.clone();

        spawn_blocking(move || {
            let browser = puppeteer(headless, proxy.as_deref())?;
            let tab = first_tab(&browser)?;

            let user_agent = user_agent.unwrap_or_else(|| random_user_agent().to_owned());
            tracing::info!(target: "browser", "choosing user-agent \x1b[1;36m{user_agent}\x1b[0m ...");
            tab.set_user_agent(&user_agent, Some("en-US"), None)?;

            Ok(ChromeSession {
                browser: Mutex::new(browser),
                tab,
            })
        })
        .await?
    }
}

pub struct ChromeSession {
    browser: Mutex<Browser>,
    tab: Arc<Tab>,
}

impl ChromeSession {
    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        spawn_blocking(move || f(&tab)).await?
    }
}

impl Session for ChromeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> anyhow::Result<()> {
        let url = url.to_owned();
        self.blocking(move |tab| puppeteer::navigate(tab, &url, timeout))
            .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> anyhow::Result<()> {
        let selector = selector.to_owned();
        self.blocking(move |tab| puppeteer::wait_for(tab, &selector, timeout))
            .await
    }

    async fn rendered(&self, selector: &str) -> anyhow::Result<Vec<anyhow::Result<String>>> {
        let selector = selector.to_owned();
        self.blocking(move |tab| puppeteer::outer_htmls(tab, &selector))
            .await
    }

    async fn scroll_by(&self, pixels: i64, duration: Duration) -> anyhow::Result<()> {
        self.blocking(move |tab| puppeteer::scroll_by(tab, pixels, duration))
            .await
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn close(self) {
        let Self { browser, tab } = self;
        let browser = browser.into_inner();

        let closed = spawn_blocking(move || {
            let closed = tab.close(true);
            // dropping the last handle kills the chrome process
            drop(browser);
            closed
        })
        .await;

        match closed {
            Ok(Ok(_)) => tracing::info!(target: "browser", "browser closed"),
            Ok(Err(e)) => tracing::warn!(target: "browser", "closing tab failed: {e:?}"),
            Err(e) => tracing::error!(target: "browser", "closing browser panicked: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agents_come_from_the_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn headless_unless_asked_otherwise() {
        use clap::Parser;

        #[derive(clap::Parser)]
        struct Cli {
            #[command(flatten)]
            browser: BrowserArgs,
        }

        let chrome = Chrome::from(Cli::parse_from(["test"]).browser);
        assert!(chrome.headless);

        let chrome = Chrome::from(Cli::parse_from(["test", "--headed", "--user-agent", "curl/8"]).browser);
        assert!(!chrome.headless);
        assert_eq!(chrome.user_agent.as_deref(), Some("curl/8"));
    }
}
