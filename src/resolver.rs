use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::FetchError;
use crate::fetch::{normalize_url, with_query, PageFetcher};
use crate::model::{non_empty, PractitionerRecord};
use crate::parser::{booking, html};

// ── Search ──

pub const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

pub trait SearchEngine {
    fn search(
        &self,
        fetcher: &dyn PageFetcher,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, FetchError>;
}

/// DuckDuckGo's no-JS results page, scraped through the page fetcher.
pub struct DuckDuckGo {
    endpoint: String,
}

impl Default for DuckDuckGo {
    fn default() -> Self {
        Self {
            endpoint: DUCKDUCKGO_HTML.to_string(),
        }
    }
}

static RESULT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.result").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.result__a").unwrap());
static SNIPPET_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").unwrap());

impl SearchEngine for DuckDuckGo {
    fn search(
        &self,
        fetcher: &dyn PageFetcher,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, FetchError> {
        let url = with_query(&self.endpoint, &[("q", query)])?;
        let page = fetcher.fetch(&url)?;

        if is_bot_check(&page.body) {
            return Err(FetchError::RateLimited {
                url,
                status: 202,
                retry_after: None,
            });
        }

        let hits = parse_duckduckgo(&page.body, limit);
        debug!(query, hits = hits.len(), "search");
        Ok(hits)
    }
}

/// DuckDuckGo's bot check page comes back as 200/202 with a captcha form.
pub fn is_bot_check(body: &str) -> bool {
    body.contains("anomaly-modal")
}

pub fn parse_duckduckgo(body: &str, limit: usize) -> Vec<SearchHit> {
    let doc = Html::parse_document(body);
    doc.select(&RESULT_SEL)
        .filter(|r| {
            !r.value()
                .attr("class")
                .is_some_and(|c| c.contains("result--ad"))
        })
        .filter_map(|r| {
            let a = r.select(&TITLE_SEL).next()?;
            let url = decode_result_link(a.value().attr("href")?)?;
            let title = html::collapse(&a.text().collect::<String>());
            let snippet = r
                .select(&SNIPPET_SEL)
                .next()
                .map(|s| html::collapse(&s.text().collect::<String>()))
                .unwrap_or_default();
            Some(SearchHit {
                url,
                title,
                snippet,
            })
        })
        .take(limit)
        .collect()
}

/// `//duckduckgo.com/l/?uddg=<target>&rut=...` → target. Direct links pass through.
fn decode_result_link(href: &str) -> Option<String> {
    let base = Url::parse("https://duckduckgo.com/").ok()?;
    let url = base.join(href.trim()).ok()?;
    if url.host_str().is_some_and(|h| h.ends_with("duckduckgo.com")) && url.path() == "/l/" {
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

// ── Query building ──

static JUNK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s.\-]").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip punctuation a search box would choke on. "Unknown" is treated as blank.
pub fn clean_search_term(term: &str) -> String {
    let Some(term) = non_empty(term.to_string()) else {
        return String::new();
    };
    let cleaned = JUNK_RE.replace_all(&term, " ");
    WS_RE.replace_all(&cleaned, " ").trim().to_string()
}

/// name + clinic + address + keyword, blanks dropped.
pub fn website_query(record: &PractitionerRecord, keyword: &str) -> String {
    [
        Some(record.name.as_str()),
        record.clinic_name.as_deref(),
        record.address.as_deref(),
        Some(keyword),
    ]
    .into_iter()
    .flatten()
    .map(clean_search_term)
    .filter(|t| !t.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

// ── Plausibility ──

/// Directories, social networks and review sites are never the clinic's own site.
pub const EXCLUDED_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "yelp.",
    "yellowpages.",
    "google.",
    "foursquare.com",
    "tripadvisor.",
    "booking.com",
    "canada411.ca",
    "wikipedia.org",
    "youtube.com",
    "pinterest.",
    "ratemds.com",
    "healthgrades.com",
    "duckduckgo.com",
];

pub fn is_plausible_clinic_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str().map(|h| h.to_ascii_lowercase()) else {
        return false;
    };
    if !host.contains('.') {
        return false;
    }
    let excluded = EXCLUDED_DOMAINS.iter().any(|d| {
        if d.ends_with('.') {
            host.starts_with(d) || host.contains(&format!(".{}", d))
        } else {
            host == *d || host.ends_with(&format!(".{}", d))
        }
    });
    // Booking vendors are picked up by the search tier, not used as the site.
    !excluded && booking::platform_of(url).is_none()
}

// ── Domain guessing ──

const HEALTHCARE_KEYWORDS: &[&str] = &[
    "clinic",
    "therapy",
    "health",
    "wellness",
    "physiotherapy",
    "massage",
    "rehabilitation",
    "treatment",
    "chiropractic",
    "kinesiology",
    "medical",
    "appointment",
];

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Plausible domains for a clinic name, most specific first.
pub fn domain_candidates(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let cleaned = WORD_RE.replace_all(&lower, "");
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let Some(first) = words.first() else {
        return Vec::new();
    };

    let all = words.concat();
    let two = words[..words.len().min(2)].concat();
    let mut out: Vec<String> = Vec::new();
    for candidate in [
        format!("{}.com", all),
        format!("{}.ca", all),
        format!("{}.com", two),
        format!("{}.ca", two),
        format!("{}clinic.com", first),
    ] {
        if candidate.len() > 6 && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// At least one significant name word and two healthcare keywords on the page.
pub fn page_matches_clinic(name: &str, body: &str) -> bool {
    let content = body.to_lowercase();
    let name = name.to_lowercase();
    let name_hits = name
        .split_whitespace()
        .filter(|w| w.len() > 3 && content.contains(*w))
        .count();
    let keyword_hits = HEALTHCARE_KEYWORDS
        .iter()
        .filter(|k| content.contains(**k))
        .count();
    name_hits >= 1 && keyword_hits >= 2
}

fn guess_domain(name: &str, fetcher: &dyn PageFetcher) -> Option<String> {
    for domain in domain_candidates(name) {
        let url = format!("https://www.{}/", domain);
        match fetcher.fetch(&url) {
            Ok(page) if page_matches_clinic(name, &page.body) => {
                info!("Guessed website {} for {}", page.url, name);
                return Some(page.url);
            }
            Ok(_) => debug!(url = %url, "guessed domain does not look like the clinic"),
            Err(e) => debug!(url = %url, "guess failed: {}", e),
        }
    }
    None
}

// ── Resolution ──

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub website: Option<String>,
    /// Search results seen on the way; reused by the search tier.
    pub hits: Vec<SearchHit>,
    pub rate_limited: bool,
}

/// Pick a website for the record. Never fails; an empty resolution means
/// nothing plausible turned up.
pub fn resolve(
    record: &PractitionerRecord,
    settings: &Settings,
    fetcher: &dyn PageFetcher,
    engine: &dyn SearchEngine,
) -> Resolution {
    let mut res = Resolution::default();

    if let Some(raw) = &record.website {
        match normalize_url(raw) {
            Some(url) => {
                res.website = Some(url);
                return res;
            }
            None => warn!("Ignoring unusable website {:?} for {}", raw, record.name),
        }
    }

    let query = website_query(record, &settings.search_keyword);
    match engine.search(fetcher, &query, settings.max_search_results) {
        Ok(hits) => res.hits = hits,
        Err(e) => {
            warn!("Search failed for {}: {}", record.name, e);
            res.rate_limited = e.is_rate_limited();
        }
    }

    res.website = res
        .hits
        .iter()
        .map(|h| h.url.as_str())
        .find(|u| is_plausible_clinic_url(u))
        .map(str::to_string);

    if res.website.is_none() && settings.guess_domains {
        let name = record.clinic_name.as_deref().unwrap_or(&record.name);
        res.website = guess_domain(name, fetcher);
    }

    match &res.website {
        Some(url) => debug!(name = %record.name, url = %url, "resolved website"),
        None => debug!(name = %record.name, "no website"),
    }
    res
}
