//! Scripted stand-ins for the browser, shared by unit tests.

use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::scrape::{Launch, Session};

pub fn post(id: &str, title: &str) -> String {
    format!(r#"<shreddit-post id="{id}" score="1.2K" comment-count="3 comments"><a slot="title">{title}</a></shreddit-post>"#)
}

#[derive(Debug, Default)]
struct Seen {
    closed: AtomicBool,
    scrolls: AtomicUsize,
    queries: AtomicUsize,
    navigations: Mutex<Vec<String>>,
}

/// Read side of what a [`FakeSession`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Seen>);

impl Trace {
    pub fn closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> usize {
        self.0.scrolls.load(Ordering::SeqCst)
    }

    /// How many times the rendered elements were read.
    pub fn queries(&self) -> usize {
        self.0.queries.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.0.navigations.lock().clone()
    }
}

/// A page whose content is a fixed list of batches. Each scroll reveals the
/// next batch; past the last one nothing is rendered.
pub struct FakeSession {
    batches: Vec<Vec<Result<String, String>>>,
    trace: Trace,
    url: Mutex<String>,
    redirect: Option<String>,
    fail_navigation: bool,
    fail_wait: bool,
    stop_after: Option<(usize, watch::Sender<bool>)>,
}

impl FakeSession {
    pub fn new(batches: Vec<Vec<Result<String, String>>>) -> Self {
        Self {
            batches,
            trace: Trace::default(),
            url: Mutex::new("about:blank".to_owned()),
            redirect: None,
            fail_navigation: false,
            fail_wait: false,
            stop_after: None,
        }
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }

    /// Land on `url` whatever address was asked for.
    pub fn redirecting_to(mut self, url: &str) -> Self {
        self.redirect = Some(url.to_owned());
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// Raise `stop` once the page has been scrolled `scrolls` times.
    pub fn cancel_after_scrolls(mut self, scrolls: usize, stop: watch::Sender<bool>) -> Self {
        self.stop_after = Some((scrolls, stop));
        self
    }
}

impl Session for FakeSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> anyhow::Result<()> {
        self.trace.0.navigations.lock().push(url.to_owned());
        if self.fail_navigation {
            anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
        }
        self.redirect.as_deref().unwrap_or(url).clone_into(&mut self.url.lock());
        Ok(())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> anyhow::Result<()> {
        if self.fail_wait {
            anyhow::bail!("timed out waiting for {selector}");
        }
        Ok(())
    }

    async fn rendered(&self, _selector: &str) -> anyhow::Result<Vec<anyhow::Result<String>>> {
        self.trace.0.queries.fetch_add(1, Ordering::SeqCst);
        let batch = self.batches.get(self.trace.scrolls()).cloned().unwrap_or_default();
        Ok(batch
            .into_iter()
            .map(|html| html.map_err(anyhow::Error::msg))
            .collect())
    }

    async fn scroll_by(&self, _pixels: i64, _duration: Duration) -> anyhow::Result<()> {
        let scrolls = self.trace.0.scrolls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, stop)) = &self.stop_after {
            if scrolls >= *after {
                stop.send_replace(true);
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        Ok(self.url.lock().clone())
    }

    async fn close(self) {
        self.trace.0.closed.store(true, Ordering::SeqCst);
    }
}

type Factory = Box<dyn Fn() -> FakeSession + Send + Sync>;

pub struct FakeLauncher {
    factory: Option<Factory>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(factory: impl Fn() -> FakeSession + Send + Sync + 'static) -> Self {
        Self {
            factory: Some(Box::new(factory)),
            launches: AtomicUsize::new(0),
        }
    }

    /// A launcher whose browser never starts.
    pub fn broken() -> Self {
        Self {
            factory: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launch for FakeLauncher {
    type Session = FakeSession;

    async fn launch(&self) -> anyhow::Result<FakeSession> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.factory
            .as_ref()
            .map(|make| make())
            .ok_or_else(|| anyhow::anyhow!("chrome binary not found"))
    }
}
