use std::sync::LazyLock;

use regex::Regex;

use super::html::{Anchor, PageContent};

/// Hostname fragments of scheduling vendors, checked as plain substrings.
pub const BOOKING_PLATFORMS: &[(&str, &str)] = &[
    ("janeapp.com", "jane"),
    ("calendly.com", "calendly"),
    ("acuityscheduling.com", "acuity"),
    ("clinicsense.com", "clinicsense"),
    ("juvonno.com", "juvonno"),
    ("cliniko.com", "cliniko"),
    ("noterro.com", "noterro"),
    ("setmore.com", "setmore"),
    ("vagaro.com", "vagaro"),
    ("mindbodyonline.com", "mindbody"),
    ("mindbody.io", "mindbody"),
    ("zocdoc.com", "zocdoc"),
    ("clientsecure.me", "simplepractice"),
    ("fresha.com", "fresha"),
    ("schedulicity.com", "schedulicity"),
    ("squareup.com/appointments", "square"),
    ("square.site", "square"),
    ("book.squareup.com", "square"),
    ("genbook.com", "genbook"),
    ("timetap.com", "timetap"),
    ("appointy.com", "appointy"),
    ("youcanbook.me", "youcanbook"),
    ("practicebetter.io", "practicebetter"),
    ("meetings.hubspot.com", "hubspot"),
    ("booksy.com", "booksy"),
    ("healthie.com", "healthie"),
    ("intakeq.com", "intakeq"),
];

static BOOKING_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        book\s*(?:now|online|an?\s+appointment|appointment|visit|treatment|session|a\s+(?:visit|session|treatment|consultation))
        | schedule\s*(?:now|online|an?\s+appointment|appointment|visit|treatment)
        | appointment\s*(?:booking|online|schedule)
        | online\s*(?:booking|scheduling|appointments?)
        | reserve\s*(?:now|online|appointment)
        | request\s*(?:an?\s+)?(?:appointment|consultation)
        | make\s*an?\s*appointment
        | (?:patient|client)\s*portal",
    )
    .unwrap()
});

static BOOKING_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://[^/]+/(?:[^?#]*/)?(?:book(?:ing)?(?:-online|-now|-appointment)?|online-booking|appointments?|request-appointment|schedul(?:e|ing)|(?:patient-|client-)?portal)/?(?:[?#].*)?$",
    )
    .unwrap()
});

static RAW_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s"'<>\\]+"#).unwrap());

/// How a booking link was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// URL points at a known scheduling vendor.
    Platform,
    /// Anchor text or path says "book", but the target is unknown.
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingLink {
    pub url: String,
    pub kind: MatchKind,
}

/// Vendor tag for a URL on a known booking platform.
pub fn platform_of(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    BOOKING_PLATFORMS
        .iter()
        .find(|(domain, _)| lower.contains(domain))
        .map(|(_, kind)| *kind)
}

/// First booking link in document order: platform anchors, then any
/// platform URL in the raw markup, then keyword anchors.
pub fn find_booking(page: &PageContent, raw_html: &str) -> Option<BookingLink> {
    if let Some(a) = page.anchors.iter().find(|a| platform_of(&a.url).is_some()) {
        return Some(platform(a.url.clone()));
    }
    if let Some(url) = first_platform_url(raw_html) {
        return Some(platform(url));
    }
    page.anchors
        .iter()
        .find(|a| is_keyword_anchor(a))
        .map(|a| BookingLink {
            url: a.url.clone(),
            kind: MatchKind::Keyword,
        })
}

/// First `http(s)://` URL in arbitrary text that lands on a booking platform.
pub fn first_platform_url(text: &str) -> Option<String> {
    RAW_URL_RE
        .find_iter(text)
        .map(|m| trim_url(m.as_str()))
        .find(|u| platform_of(u).is_some())
}

fn is_keyword_anchor(a: &Anchor) -> bool {
    BOOKING_TEXT_RE.is_match(&a.text) || BOOKING_PATH_RE.is_match(&a.url)
}

fn platform(url: String) -> BookingLink {
    BookingLink {
        url,
        kind: MatchKind::Platform,
    }
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches(['"', '\'', ',', ')', '}', ']', ';', '.'])
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::parse_page;

    fn find(html: &str) -> Option<BookingLink> {
        let page = parse_page("https://clinic.ca/", html);
        find_booking(&page, html)
    }

    #[test]
    fn platform_anchor_wins_over_earlier_keyword() {
        let html = r#"<a href="/contact">Book Now</a>
                      <a href="https://coast.janeapp.com/#/staff_member/3">Igor</a>"#;
        let b = find(html).unwrap();
        assert_eq!(b.url, "https://coast.janeapp.com/#/staff_member/3");
        assert_eq!(b.kind, MatchKind::Platform);
    }

    #[test]
    fn first_platform_in_document_order() {
        let html = r#"<a href="https://calendly.com/dr-a">A</a>
                      <a href="https://x.janeapp.com/">B</a>"#;
        assert_eq!(find(html).unwrap().url, "https://calendly.com/dr-a");
    }

    #[test]
    fn platform_url_in_script() {
        let html = r#"<script>window.widget = {url: "https://prospect.janeapp.com/locations/1"};</script>
                      <a href="/book">Book</a>"#;
        let b = find(html).unwrap();
        assert_eq!(b.url, "https://prospect.janeapp.com/locations/1");
        assert_eq!(b.kind, MatchKind::Platform);
    }

    #[test]
    fn keyword_text_link() {
        let html = r#"<a href="/services">Services</a><a href="/reserve">Book an appointment</a>"#;
        let b = find(html).unwrap();
        assert_eq!(b.url, "https://clinic.ca/reserve");
        assert_eq!(b.kind, MatchKind::Keyword);
    }

    #[test]
    fn keyword_path_link() {
        let html = r#"<a href="/services">Services</a><a href="/book-online/">Go</a>"#;
        assert_eq!(find(html).unwrap().url, "https://clinic.ca/book-online/");
    }

    #[test]
    fn nothing_found() {
        assert_eq!(find(r#"<a href="/about">About us</a><p>Facebook book club</p>"#), None);
    }

    #[test]
    fn raw_url_trimming() {
        assert_eq!(
            first_platform_url(r#"see (https://a.janeapp.com/x?a=1&amp;b=2), thanks"#).as_deref(),
            Some("https://a.janeapp.com/x?a=1&b=2")
        );
        assert_eq!(platform_of("https://CALENDLY.com/x"), Some("calendly"));
        assert_eq!(platform_of("https://example.com"), None);
    }
}
