use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::fetch::{with_query, PageFetcher};

pub const TEXT_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
pub const DETAILS_URL: &str = "https://maps.googleapis.com/maps/api/place/details/json";
const DETAIL_FIELDS: &str = "name,website,opening_hours,formatted_address";

// ── Response types ──

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Place {
    pub place_id: Option<String>,
    pub name: Option<String>,
    pub website: Option<String>,
    pub formatted_address: Option<String>,
    pub opening_hours: Option<OpeningHours>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OpeningHours {
    #[serde(default)]
    pub weekday_text: Vec<String>,
}

impl Place {
    /// `weekday_text` lines joined into one string for the hours parser.
    pub fn hours_text(&self) -> String {
        self.opening_hours
            .as_ref()
            .map(|h| h.weekday_text.join(", "))
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<Place>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    result: Option<Place>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusOnly {
    status: String,
}

/// A Places JSON body whose `status` is an error (quota, denied key, ...).
pub fn is_error_body(body: &str) -> bool {
    serde_json::from_str::<StatusOnly>(body)
        .map(|r| check_status(&r.status, None).is_err())
        .unwrap_or(false)
}

// ── Client ──

/// Google Places (legacy web service) over the shared page fetcher.
pub struct PlacesClient {
    api_key: String,
    text_search_url: String,
    details_url: String,
}

impl PlacesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            text_search_url: TEXT_SEARCH_URL.to_string(),
            details_url: DETAILS_URL.to_string(),
        }
    }

    /// Text Search, then Details for the first hit. `Ok(None)` when Google
    /// knows nothing about the query.
    pub fn find_place(
        &self,
        fetcher: &dyn PageFetcher,
        query: &str,
    ) -> Result<Option<Place>, SourceError> {
        let body = self.get(
            fetcher,
            &self.text_search_url,
            &[("query", query), ("key", self.api_key.as_str())],
        )?;
        let search: TextSearchResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        check_status(&search.status, search.error_message.as_deref())?;

        let Some(first) = search.results.into_iter().next() else {
            debug!(query, "places: no results");
            return Ok(None);
        };
        let Some(place_id) = first.place_id.clone() else {
            return Ok(Some(first));
        };

        let body = self.get(
            fetcher,
            &self.details_url,
            &[
                ("place_id", place_id.as_str()),
                ("fields", DETAIL_FIELDS),
                ("key", self.api_key.as_str()),
            ],
        )?;
        let details: DetailsResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        check_status(&details.status, details.error_message.as_deref())?;

        let mut place = details.result.unwrap_or(first);
        place.place_id.get_or_insert(place_id);
        Ok(Some(place))
    }

    fn get(
        &self,
        fetcher: &dyn PageFetcher,
        base: &str,
        params: &[(&str, &str)],
    ) -> Result<String, SourceError> {
        let url = with_query(base, params).map_err(|e| e.redact(&self.api_key))?;
        let page = fetcher.fetch(&url).map_err(|e| e.redact(&self.api_key))?;
        Ok(page.body)
    }
}

fn check_status(status: &str, message: Option<&str>) -> Result<(), SourceError> {
    let detail = || match message {
        Some(m) => format!("{}: {}", status, m),
        None => status.to_string(),
    };
    match status {
        "OK" | "ZERO_RESULTS" => Ok(()),
        "OVER_QUERY_LIMIT" => Err(SourceError::ApiRateLimited(detail())),
        _ => Err(SourceError::Api(detail())),
    }
}
