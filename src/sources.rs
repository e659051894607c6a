use itertools::Itertools;
use reqwest::Url;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::SourceError;
use crate::fetch::{normalize_url, PageFetcher};
use crate::model::{DataSource, ExtractionResult, Hours, PractitionerRecord};
use crate::parser::booking::{self, BookingLink, MatchKind};
use crate::parser::{analyze_page, hours};
use crate::places::PlacesClient;
use crate::resolver::{clean_search_term, SearchEngine, SearchHit};

/// Where booking widgets usually live when the home page does not link them.
pub const PROBE_PATHS: &[&str] = &["/book", "/booking", "/book-online", "/appointments", "/schedule"];

/// Everything a tier may look at for one record.
pub struct LookupContext<'a> {
    pub record: &'a PractitionerRecord,
    /// Supplied or resolved clinic website.
    pub website: Option<&'a str>,
    /// Hits the resolver already paid for.
    pub hits: &'a [SearchHit],
    pub settings: &'a Settings,
    pub fetcher: &'a dyn PageFetcher,
    pub engine: &'a dyn SearchEngine,
}

/// What one tier turned up. Never constructed empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Found {
    pub booking_url: Option<String>,
    pub hours: Hours,
    /// A website learned along the way (API tier).
    pub website: Option<String>,
}

impl Found {
    /// Needs a booking URL or at least one open/close time.
    fn new(booking_url: Option<String>, hours: Hours) -> Option<Self> {
        (booking_url.is_some() || hours.has_times()).then(|| Self {
            booking_url,
            hours,
            website: None,
        })
    }
}

/// One tier of the fallback chain.
pub trait ExtractionSource {
    fn tag(&self) -> DataSource;

    /// `Ok(None)` means the tier ran fine and found nothing.
    fn attempt(&self, ctx: &LookupContext<'_>) -> Result<Option<Found>, SourceError>;
}

/// Website → search snippets → Places API.
pub fn default_chain(settings: &Settings) -> Vec<Box<dyn ExtractionSource>> {
    vec![
        Box::new(ClinicWebsite),
        Box::new(SearchSnippet),
        Box::new(PlacesApi::new(settings.google_api_key.clone())),
    ]
}

/// Result of running the whole chain for one record.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub result: ExtractionResult,
    pub rate_limited: bool,
    pub failures: usize,
}

/// First tier with a booking URL or opening times wins. Errors are logged and
/// counted, never returned.
pub fn run_chain(ctx: &LookupContext<'_>, sources: &[Box<dyn ExtractionSource>]) -> Outcome {
    let name = ctx.record.name.as_str();
    let website = ctx.website.unwrap_or_default();
    let mut rate_limited = false;
    let mut failures = 0;

    for source in sources {
        match source.attempt(ctx) {
            Ok(Some(found)) => {
                debug!(name, source = %source.tag(), "found");
                let site = match (website, found.website) {
                    ("", Some(w)) => w,
                    (w, _) => w.to_string(),
                };
                return Outcome {
                    result: ExtractionResult::from_parts(
                        name,
                        &site,
                        found.booking_url,
                        found.hours,
                        source.tag(),
                    ),
                    rate_limited,
                    failures,
                };
            }
            Ok(None) => debug!(name, source = %source.tag(), "nothing found"),
            Err(SourceError::MissingConfig(what)) => {
                debug!(name, source = %source.tag(), "skipped, no {}", what)
            }
            Err(e) => {
                warn!("{} [{}]: {}", name, source.tag(), e);
                rate_limited |= e.is_rate_limited();
                failures += 1;
            }
        }
    }

    Outcome {
        result: ExtractionResult::empty(name, website),
        rate_limited,
        failures,
    }
}

// ── Clinic website ──

pub struct ClinicWebsite;

impl ExtractionSource for ClinicWebsite {
    fn tag(&self) -> DataSource {
        DataSource::ClinicWebsite
    }

    fn attempt(&self, ctx: &LookupContext<'_>) -> Result<Option<Found>, SourceError> {
        let Some(website) = ctx.website else {
            return Ok(None);
        };
        let page = ctx.fetcher.fetch(website)?;
        let findings = analyze_page(&page.url, &page.body);

        let booking = if ctx.settings.deep_booking_scan {
            match findings.booking {
                Some(link) if link.kind == MatchKind::Keyword => {
                    Some(follow_keyword_link(&link, ctx.fetcher))
                }
                Some(link) => Some(link.url),
                None => probe_booking_paths(&page.url, ctx.settings.probe_paths, ctx.fetcher),
            }
        } else {
            findings.booking.map(|b| b.url)
        };

        Ok(Found::new(booking, findings.hours))
    }
}

/// A "Book now" link often bounces to a vendor; prefer the vendor URL.
fn follow_keyword_link(link: &BookingLink, fetcher: &dyn PageFetcher) -> String {
    match fetcher.fetch(&link.url) {
        Ok(page) => platform_link_on(&page.url, &page.body).unwrap_or_else(|| link.url.clone()),
        Err(e) => {
            debug!(url = %link.url, "booking link not followed: {}", e);
            link.url.clone()
        }
    }
}

fn probe_booking_paths(base: &str, limit: usize, fetcher: &dyn PageFetcher) -> Option<String> {
    let base = Url::parse(base).ok()?;
    for path in PROBE_PATHS.iter().take(limit) {
        let Ok(url) = base.join(path) else {
            continue;
        };
        match fetcher.fetch(url.as_str()) {
            Ok(page) => {
                if let Some(found) = platform_link_on(&page.url, &page.body) {
                    debug!(probe = %url, found = %found, "booking platform via probe");
                    return Some(found);
                }
            }
            Err(e) => debug!(probe = %url, "{}", e),
        }
    }
    None
}

fn platform_link_on(final_url: &str, body: &str) -> Option<String> {
    if booking::platform_of(final_url).is_some() {
        return Some(final_url.to_string());
    }
    analyze_page(final_url, body)
        .booking
        .filter(|b| b.kind == MatchKind::Platform)
        .map(|b| b.url)
}

// ── Search snippets ──

pub struct SearchSnippet;

impl SearchSnippet {
    /// Queries in the order they are tried; parts the record lacks are skipped.
    pub fn queries(record: &PractitionerRecord, website: Option<&str>) -> Vec<String> {
        let quoted = |s: &str| {
            let t = clean_search_term(s);
            (!t.is_empty()).then(|| format!("\"{}\"", t))
        };
        let name = quoted(&record.name);
        let clinic = record.clinic_name.as_deref().and_then(quoted);
        let address = record.address.as_deref().and_then(quoted);
        let domain = website
            .and_then(|w| Url::parse(w).ok())
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()));

        let mut queries = Vec::new();
        if let Some(clinic) = &clinic {
            queries.push(format!("{} hours opening times", clinic));
            if let Some(address) = &address {
                queries.push(format!("{} {} hours", clinic, address));
            }
        }
        if let Some(domain) = domain {
            queries.push(format!("site:{} hours opening times", domain));
        }
        if let Some(name) = &name {
            if let Some(clinic) = &clinic {
                queries.push(format!("{} {} schedule hours", name, clinic));
            }
            let address = record
                .address
                .as_deref()
                .map(clean_search_term)
                .unwrap_or_default();
            queries.push(
                [name.as_str(), address.as_str(), "hours appointment"]
                    .into_iter()
                    .filter(|p| !p.is_empty())
                    .join(" "),
            );
        }
        queries
    }
}

impl ExtractionSource for SearchSnippet {
    fn tag(&self) -> DataSource {
        DataSource::SearchFallback
    }

    fn attempt(&self, ctx: &LookupContext<'_>) -> Result<Option<Found>, SourceError> {
        let mut last_err = None;
        for query in Self::queries(ctx.record, ctx.website) {
            match ctx
                .engine
                .search(ctx.fetcher, &query, ctx.settings.max_search_results)
            {
                Ok(hits) => {
                    if let Some(found) = snippet_findings(&hits) {
                        debug!(query = %query, "snippet match");
                        return Ok(Some(found));
                    }
                }
                Err(e) => {
                    debug!(query = %query, "search failed: {}", e);
                    let stop = e.is_rate_limited();
                    last_err = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }

        // Hits the resolver already fetched are the last resort.
        if let Some(found) = snippet_findings(ctx.hits) {
            if let Some(e) = &last_err {
                warn!("Search failed for {}, using earlier results: {}", ctx.record.name, e);
            }
            return Ok(Some(found));
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }
}

fn snippet_findings(hits: &[SearchHit]) -> Option<Found> {
    let booking = hits.iter().find_map(|h| {
        booking::platform_of(&h.url)
            .map(|_| h.url.clone())
            .or_else(|| booking::first_platform_url(&h.snippet))
    });
    let text = hits
        .iter()
        .map(|h| format!("{} {}", h.title, h.snippet))
        .join(" | ");
    Found::new(booking, hours::extract_hours(&text))
}

// ── Places API ──

pub struct PlacesApi {
    client: Option<PlacesClient>,
}

impl PlacesApi {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: api_key.map(PlacesClient::new),
        }
    }

    pub fn query(record: &PractitionerRecord, keyword: &str) -> String {
        [Some(record.name.as_str()), record.address.as_deref(), Some(keyword)]
            .into_iter()
            .flatten()
            .map(clean_search_term)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ExtractionSource for PlacesApi {
    fn tag(&self) -> DataSource {
        DataSource::ApiFallback
    }

    fn attempt(&self, ctx: &LookupContext<'_>) -> Result<Option<Found>, SourceError> {
        let Some(client) = &self.client else {
            return Err(SourceError::MissingConfig("GOOGLE_API_KEY"));
        };
        let query = Self::query(ctx.record, &ctx.settings.search_keyword);
        let Some(place) = client.find_place(ctx.fetcher, &query)? else {
            return Ok(None);
        };
        debug!(name = ?place.name, address = ?place.formatted_address, "places match");

        let found_hours = hours::extract_hours(&place.hours_text());
        let website = place.website.as_deref().and_then(normalize_url);
        let booking = website.as_deref().and_then(|site| match ctx.fetcher.fetch(site) {
            Ok(page) => analyze_page(&page.url, &page.body).booking.map(|b| b.url),
            Err(e) => {
                debug!(site, "places website not fetched: {}", e);
                None
            }
        });

        Ok(Found::new(booking, found_hours).map(|f| Found { website, ..f }))
    }
}
