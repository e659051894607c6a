use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Url;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::fetch::{Page, PageFetcher};
use crate::{places, resolver};

/// Query parameters never written to the cache.
const SECRET_PARAMS: [&str; 1] = ["key"];

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating cache dir {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed opening cache DB {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            url        TEXT PRIMARY KEY,
            final_url  TEXT NOT NULL,
            body       TEXT NOT NULL,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

pub fn get_page(conn: &Connection, url: &str) -> Result<Option<Page>> {
    let page = conn
        .query_row(
            "SELECT final_url, body FROM pages WHERE url = ?1",
            [url],
            |row| {
                Ok(Page {
                    url: row.get(0)?,
                    body: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(page)
}

pub fn put_page(conn: &Connection, url: &str, page: &Page) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO pages (url, final_url, body) VALUES (?1, ?2, ?3)",
        rusqlite::params![url, page.url, page.body],
    )?;
    Ok(())
}

pub fn count_pages(conn: &Connection) -> Result<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
    Ok(n as usize)
}

/// `url` with secret query parameters removed.
pub fn cache_key(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let is_secret = |k: &str| SECRET_PARAMS.contains(&k);
    if !parsed.query_pairs().any(|(k, _)| is_secret(&k)) {
        return url.to_string();
    }
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_secret(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(&kept);
    }
    parsed.to_string()
}

/// Bot checks and API error payloads arrive as 200s but must not be replayed.
pub fn cacheable(page: &Page) -> bool {
    !resolver::is_bot_check(&page.body) && !places::is_error_body(&page.body)
}

/// Replays stored responses; only successful, cacheable fetches are stored.
pub struct CachedFetcher<F> {
    inner: F,
    conn: Connection,
}

impl<F: PageFetcher> CachedFetcher<F> {
    pub fn new(inner: F, conn: Connection) -> Self {
        Self { inner, conn }
    }

    pub fn stored(&self) -> Result<usize> {
        count_pages(&self.conn)
    }
}

impl<F: PageFetcher> PageFetcher for CachedFetcher<F> {
    fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let key = cache_key(url);
        match get_page(&self.conn, &key) {
            Ok(Some(page)) => {
                debug!(url = %key, "cache hit");
                return Ok(page);
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for {}: {:#}", key, e),
        }

        let page = self.inner.fetch(url)?;
        if !cacheable(&page) {
            debug!(url = %key, "not caching error page");
            return Ok(page);
        }
        let stored = Page {
            url: cache_key(&page.url),
            body: page.body.clone(),
        };
        if let Err(e) = put_page(&self.conn, &key, &stored) {
            warn!("Cache write failed for {}: {:#}", key, e);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fake::FakeFetcher;

    #[test]
    fn second_fetch_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("cache/pages.sqlite")).unwrap();
        let fake = FakeFetcher::new().redirect("https://a.ca/", "https://www.a.ca/", "<p>hi</p>");
        let cached = CachedFetcher::new(&fake, conn);

        let first = cached.fetch("https://a.ca/").unwrap();
        let second = cached.fetch("https://a.ca/").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.url, "https://www.a.ca/");
        assert_eq!(fake.calls().len(), 1);
        assert_eq!(cached.stored().unwrap(), 1);
    }

    fn in_memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn bot_checks_and_api_errors_are_not_cached() {
        let urls = [
            "https://html.duckduckgo.com/html/?q=coast",
            "https://maps.googleapis.com/maps/api/place/textsearch/json?query=coast&key=secret",
            "https://maps.googleapis.com/maps/api/place/details/json?place_id=p1&key=secret",
        ];
        let fake = FakeFetcher::new()
            .page(urls[0], r#"<div class="anomaly-modal"></div>"#)
            .page(urls[1], r#"{"status":"OVER_QUERY_LIMIT"}"#)
            .page(urls[2], r#"{"status":"REQUEST_DENIED"}"#);
        let cached = CachedFetcher::new(&fake, in_memory());

        for url in urls {
            assert!(cached.fetch(url).is_ok());
            assert!(cached.fetch(url).is_ok());
        }
        assert_eq!(cached.stored().unwrap(), 0);
        assert_eq!(fake.calls().len(), 6);
    }

    #[test]
    fn api_key_is_stripped_from_stored_urls() {
        let url = "https://maps.googleapis.com/maps/api/place/textsearch/json?query=coast+therapy&key=secret";
        let fake = FakeFetcher::new().page(url, r#"{"status":"OK","results":[]}"#);
        let cached = CachedFetcher::new(&fake, in_memory());

        cached.fetch(url).unwrap();
        let replay = cached.fetch(url).unwrap();
        assert_eq!(fake.calls().len(), 1);
        assert!(!replay.url.contains("secret"));

        let (key, final_url): (String, String) = cached
            .conn
            .query_row("SELECT url, final_url FROM pages", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(
            key,
            "https://maps.googleapis.com/maps/api/place/textsearch/json?query=coast+therapy"
        );
        assert_eq!(final_url, key);
    }

    #[test]
    fn cache_key_keeps_other_params() {
        assert_eq!(cache_key("https://a.ca/x?key=s"), "https://a.ca/x");
        assert_eq!(cache_key("https://a.ca/x?a=1&key=s&b=2"), "https://a.ca/x?a=1&b=2");
        assert_eq!(cache_key("https://a.ca/?monkey=1"), "https://a.ca/?monkey=1");
        assert_eq!(cache_key("not a url"), "not a url");
    }

    #[test]
    fn failures_are_not_cached() {
        let fake = FakeFetcher::new();
        let cached = CachedFetcher::new(&fake, in_memory());

        assert!(cached.fetch("https://down.ca/").is_err());
        assert!(cached.fetch("https://down.ca/").is_err());
        assert_eq!(fake.calls().len(), 2);
        assert_eq!(cached.stored().unwrap(), 0);
    }
}
