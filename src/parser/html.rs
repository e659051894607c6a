use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href], iframe[src], form[action]").unwrap());
static HOURS_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[class], [id]").unwrap());
static HOURS_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)hours|schedule|opening|time").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// A link-bearing element, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Absolute URL (resolved against the page URL when possible).
    pub url: String,
    pub text: String,
}

/// What the extractors need from one HTML page.
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub anchors: Vec<Anchor>,
    /// Visible text, whitespace collapsed.
    pub text: String,
    /// Text of elements that look like opening-hours widgets.
    pub hours_text: String,
}

pub fn parse_page(base_url: &str, html: &str) -> PageContent {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let anchors = document
        .select(&LINK_SEL)
        .filter_map(|el| {
            let raw = el
                .value()
                .attr("href")
                .or_else(|| el.value().attr("src"))
                .or_else(|| el.value().attr("action"))?;
            let url = resolve(base.as_ref(), raw)?;
            Some(Anchor {
                url,
                text: collapse(&visible_text(el)),
            })
        })
        .collect();

    let text = collapse(&visible_text(document.root_element()));

    // Nested matches would repeat text; keep only outermost hours containers.
    let mut hours_parts = Vec::new();
    for el in document.select(&HOURS_SEL) {
        if !looks_like_hours(&el) || has_hours_ancestor(&el) {
            continue;
        }
        let part = collapse(&visible_text(el));
        if !part.is_empty() {
            hours_parts.push(part);
        }
    }

    PageContent {
        anchors,
        text,
        hours_text: hours_parts.join(" | "),
    }
}

/// Text nodes joined with spaces so "Monday</td><td>9:00" does not glue.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIP_TAGS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    out
}

fn looks_like_hours(el: &ElementRef<'_>) -> bool {
    let v = el.value();
    if SKIP_TAGS.contains(&v.name()) || v.name() == "body" || v.name() == "html" {
        return false;
    }
    v.attr("class")
        .into_iter()
        .chain(v.attr("id"))
        .any(|a| HOURS_ATTR_RE.is_match(a))
}

fn has_hours_ancestor(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| looks_like_hours(&a))
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if raw.is_empty()
        || raw.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:")
        || lower.starts_with("data:")
    {
        return None;
    }
    let url = match base {
        Some(b) => b.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

pub fn collapse(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_string()
}
