//! Turning one rendered feed element into a [`Candidate`].
//!
//! Everything here is tied to the feed's current markup, so every lookup is an
//! ordered list of fallbacks and every failure degrades to a default instead of
//! an error. Callers must expect partial records.

use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::record::{Candidate, Extraction, RejectReason};

/// A marker glued to the digits always counts (`1.2Kvotes`); one after a
/// space must end the word (`5 members` is not five million).
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-)?(\d[\d,]*(?:\.\d+)?|\.\d+)(?:([kKmM])|\s+([kKmM])\b)?").unwrap()
});

static COMPACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d[\d,]*(?:\.\d+)?|\.\d+)[kKmM]$").unwrap());

/// Attributes on the element root that may carry the site's own identifier.
const ID_ATTRS: [&str; 4] = ["id", "data-fullname", "data-mfe-id", "data-post-id"];

struct Selectors {
    slot_title: Selector,
    title_link: Selector,
    h1: Selector,
    h2: Selector,
    h3: Selector,
    faceplate_number: Selector,
    score: Selector,
    comment_count: Selector,
    comments_button: Selector,
    full_post_link: Selector,
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| {
    let sel = |s: &str| Selector::parse(s).unwrap();
    Selectors {
        slot_title: sel(r#"[slot="title"]"#),
        title_link: sel(r#"a[data-testid="post-title"]"#),
        h1: sel("h1"),
        h2: sel("h2"),
        h3: sel("h3"),
        faceplate_number: sel("faceplate-number[number]"),
        score: sel(r#"[data-testid="score"]"#),
        comment_count: sel(r#"[data-testid="comment-count"]"#),
        comments_button: sel(r#"a[data-testid="comments-button"]"#),
        full_post_link: sel(r#"a[slot="full-post-link"]"#),
    }
});

/// Parse a human-readable score such as `"1.2K"`, `"15,301"` or `"53 points"`.
///
/// A `K` marker multiplies by a thousand and `M` by a million. Anything that
/// does not start with a non-negative number yields `0`.
pub fn parse_score(text: &str) -> u64 {
    let Some(cap) = NUMBER.captures(text) else {
        return 0;
    };
    if cap.get(1).is_some() {
        return 0;
    }

    let digits = cap[2].replace(',', "");
    let multiplier = match cap.get(3).or_else(|| cap.get(4)).map(|m| m.as_str()) {
        Some("k" | "K") => 1e3,
        Some("m" | "M") => 1e6,
        _ => {
            return digits
                .parse()
                .unwrap_or_else(|_| digits.parse::<f64>().map_or(0, |v| v.trunc() as u64));
        }
    };

    digits
        .parse::<f64>()
        .map_or(0, |v| (v * multiplier).round() as u64)
}

/// Parse a comment counter such as `"53 comments"` from its leading token.
pub fn parse_comments(text: &str) -> u64 {
    let Some(token) = text.split_whitespace().next() else {
        return 0;
    };
    let token = token.replace(',', "");
    match token.parse() {
        Ok(n) => n,
        Err(_) if COMPACT.is_match(&token) => parse_score(&token),
        Err(_) => 0,
    }
}

pub(crate) fn collapse<'a>(text: impl Iterator<Item = &'a str>) -> String {
    let joined = text.collect::<String>();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty_attr<'a>(element: ElementRef<'a>, name: &str) -> Option<&'a str> {
    element.attr(name).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn first_text(root: ElementRef<'_>, selectors: &[&Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        root.select(sel)
            .map(|e| collapse(e.text()))
            .find(|t| !t.is_empty())
    })
}

fn first_attr_of(root: ElementRef<'_>, selectors: &[&Selector], name: &str) -> Option<String> {
    selectors.iter().find_map(|sel| {
        root.select(sel)
            .find_map(|e| non_empty_attr(e, name))
            .map(ToOwned::to_owned)
    })
}

/// The element the fragment was rendered from, skipping the parser's
/// synthetic `<html>` wrapper.
fn top_element(fragment: &Html) -> Option<ElementRef<'_>> {
    let root = fragment.root_element();
    if root.value().name() == "html" {
        root.child_elements().next()
    } else {
        Some(root)
    }
}

/// Field extractor for one feed; `base` resolves relative links.
#[derive(Debug, Clone)]
pub struct Extractor {
    base: Url,
}

impl Extractor {
    pub const fn new(base: Url) -> Self {
        Self { base }
    }

    /// Extract a candidate from the outer HTML of one rendered element.
    pub fn extract(&self, outer_html: &str) -> Extraction {
        let fragment = Html::parse_fragment(outer_html);
        let Some(root) = top_element(&fragment) else {
            return Extraction::rejected(RejectReason::NoElement);
        };

        let Some(external_id) = ID_ATTRS.iter().find_map(|a| non_empty_attr(root, a)) else {
            return Extraction::rejected(RejectReason::MissingIdentifier);
        };

        let title = non_empty_attr(root, "post-title")
            .map(|t| collapse(core::iter::once(t)))
            .or_else(|| {
                first_text(
                    root,
                    &[&SEL.slot_title, &SEL.title_link, &SEL.h1, &SEL.h2, &SEL.h3],
                )
            });
        let Some(title) = title else {
            return Extraction::rejected(RejectReason::MissingTitle);
        };

        let score = non_empty_attr(root, "score")
            .map(ToOwned::to_owned)
            .or_else(|| first_attr_of(root, &[&SEL.faceplate_number], "number"))
            .or_else(|| first_text(root, &[&SEL.score]))
            .map_or(0, |t| parse_score(&t));

        let comment_count = non_empty_attr(root, "comment-count")
            .map(ToOwned::to_owned)
            .or_else(|| first_text(root, &[&SEL.comment_count, &SEL.comments_button]))
            .map_or(0, |t| parse_comments(&t));

        let link = non_empty_attr(root, "permalink")
            .map(ToOwned::to_owned)
            .or_else(|| first_attr_of(root, &[&SEL.title_link, &SEL.full_post_link], "href"))
            .or_else(|| non_empty_attr(root, "content-href").map(ToOwned::to_owned))
            .and_then(|href| self.base.join(&href).ok())
            .map(String::from);

        Extraction::Valid(Candidate {
            external_id: CompactString::new(external_id),
            title,
            score,
            comment_count,
            link,
        })
    }
}
