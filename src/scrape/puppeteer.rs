use std::{ffi::OsStr, sync::Arc, time::Duration};

use headless_chrome::{Browser, Element, LaunchOptions, Tab, browser::tab::NoElementFound};

/// How long the browser may sit without receiving a command before
/// `headless_chrome` gives up on it. Runs pause for seconds between scrolls.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub fn puppeteer(headless: bool, proxy: Option<&str>) -> anyhow::Result<Browser> {
    Browser::new(LaunchOptions {
        args: vec![OsStr::new("--disable-blink-features=AutomationControlled")],
        headless,
        proxy_server: proxy,
        idle_browser_timeout: IDLE_TIMEOUT,
        ..LaunchOptions::default()
    })
}

#[allow(clippy::significant_drop_tightening)]
pub fn first_tab(browser: &Browser) -> anyhow::Result<Arc<Tab>> {
    let tab = browser.new_tab()?;

    {
        let tabs_guard = browser
            .get_tabs()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        for remain in &*tabs_guard {
            if !Arc::ptr_eq(&tab, remain) {
                remain.close(true)?;
            }
        }
    }

    Ok(tab)
}

pub fn navigate(tab: &Tab, url: &str, timeout: Duration) -> anyhow::Result<()> {
    tab.set_default_timeout(timeout);
    tab.navigate_to(url)?.wait_until_navigated()?;
    Ok(())
}

pub fn wait_for(tab: &Tab, selector: &str, timeout: Duration) -> anyhow::Result<()> {
    tab.wait_for_element_with_custom_timeout(selector, timeout)
        .map(|_| ())
}

/// Outer HTML of every element matching `selector`, each read on its own so
/// one detached node does not spoil the batch.
pub fn outer_htmls(tab: &Tab, selector: &str) -> anyhow::Result<Vec<anyhow::Result<String>>> {
    let elements = match tab.find_elements(selector) {
        Ok(elements) => elements,
        Err(err) if err.is::<NoElementFound>() => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    Ok(elements.iter().map(Element::get_content).collect())
}

pub fn scroll_by(tab: &Tab, pixels: i64, duration: Duration) -> anyhow::Result<()> {
    let script = if duration.is_zero() {
        format!("window.scrollBy(0, {pixels})")
    } else {
        // linear easing, resolved once the final position is reached
        format!(
            "new Promise(resolve => {{
                const startY = window.scrollY, dist = {pixels}, dur = {ms}, t0 = performance.now();
                const step = () => {{
                    const p = Math.min((performance.now() - t0) / dur, 1);
                    window.scrollTo(0, startY + dist * p);
                    if (p < 1) requestAnimationFrame(step); else resolve(window.scrollY);
                }};
                requestAnimationFrame(step);
            }})",
            ms = duration.as_millis(),
        )
    };

    tab.evaluate(&script, !duration.is_zero()).map(|_| ())
}
