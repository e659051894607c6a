pub mod booking;
pub mod hours;
pub mod html;

use booking::BookingLink;

use crate::model::Hours;

/// Everything the heuristics found on one page.
#[derive(Debug, Clone, Default)]
pub struct PageFindings {
    pub booking: Option<BookingLink>,
    pub hours: Hours,
}

/// HTML → anchors/text → booking link + hours.
///
/// Hours come from hours-like containers first; the whole page is only
/// scanned when those give nothing.
pub fn analyze_page(url: &str, html: &str) -> PageFindings {
    let content = html::parse_page(url, html);
    let booking = booking::find_booking(&content, html);

    let mut found = hours::extract_hours(&content.hours_text);
    if found.weekday_open.is_empty() && found.weekend_open.is_empty() {
        found = hours::extract_hours(&content.text);
    }

    PageFindings {
        booking,
        hours: found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::booking::MatchKind;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn coast_therapy_page() {
        let f = analyze_page("http://www.coasttherapy.ca/", &fixture("coast_therapy"));
        let booking = f.booking.unwrap();
        assert_eq!(booking.url, "https://coasttherapy.janeapp.com/");
        assert_eq!(booking.kind, MatchKind::Platform);
        assert_eq!(f.hours.weekday_open, "07:00 AM");
        assert_eq!(f.hours.weekday_close, "08:00 PM");
        assert_eq!(f.hours.weekend_open, "09:00 AM");
        assert_eq!(f.hours.weekend_close, "03:00 PM");
        assert_eq!(f.hours.days_closed, "Sunday");
    }

    #[test]
    fn prospect_page_keyword_link_and_body_hours() {
        let f = analyze_page("https://prospecttherapy.ca/", &fixture("prospect_therapy"));
        let booking = f.booking.unwrap();
        assert_eq!(booking.kind, MatchKind::Keyword);
        assert_eq!(booking.url, "https://prospecttherapy.ca/book-online");
        assert_eq!(f.hours.weekday_open, "08:00 AM");
        assert_eq!(f.hours.weekday_close, "06:00 PM");
        assert_eq!(f.hours.days_closed, "Saturday, Sunday");
    }

    #[test]
    fn bare_page_finds_nothing() {
        let f = analyze_page("https://x.ca/", &fixture("no_signals"));
        assert!(f.booking.is_none());
        assert_eq!(f.hours, Hours::default());
    }
}
