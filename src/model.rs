use serde::{Deserialize, Serialize};

/// One input row: who we are looking for and what we already know.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PractitionerRecord {
    pub name: String,
    pub website: Option<String>,
    pub address: Option<String>,
    pub clinic_name: Option<String>,
}

impl PractitionerRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = non_empty(website.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = non_empty(address.into());
        self
    }

    pub fn with_clinic_name(mut self, clinic: impl Into<String>) -> Self {
        self.clinic_name = non_empty(clinic.into());
        self
    }
}

/// Trimmed value, or `None` for blanks and the spreadsheet placeholder "Unknown".
pub fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Which tier of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    ClinicWebsite,
    SearchFallback,
    ApiFallback,
    #[default]
    None,
}

impl DataSource {
    pub const ALL: [DataSource; 4] = [
        DataSource::ClinicWebsite,
        DataSource::SearchFallback,
        DataSource::ApiFallback,
        DataSource::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::ClinicWebsite => "clinic_website",
            DataSource::SearchFallback => "search_fallback",
            DataSource::ApiFallback => "api_fallback",
            DataSource::None => "none",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating hours collapsed into weekday/weekend buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hours {
    pub weekday_open: String,
    pub weekday_close: String,
    pub weekend_open: String,
    pub weekend_close: String,
    pub days_closed: String,
}

impl Hours {
    /// At least one open/close time. Closed days alone don't count.
    pub fn has_times(&self) -> bool {
        !(self.weekday_open.is_empty()
            && self.weekday_close.is_empty()
            && self.weekend_open.is_empty()
            && self.weekend_close.is_empty())
    }
}

/// One output row. Column order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub practitioner_name: String,
    pub clinic_website: String,
    pub booking_url: String,
    pub weekday_earliest_am: String,
    pub weekday_latest_pm: String,
    pub weekend_earliest_am: String,
    pub weekend_latest_pm: String,
    pub days_closed: String,
    pub data_source: DataSource,
}

impl ExtractionResult {
    /// Result for a record where nothing was found.
    pub fn empty(name: &str, website: &str) -> Self {
        Self {
            practitioner_name: name.to_string(),
            clinic_website: website.to_string(),
            ..Default::default()
        }
    }

    pub fn from_parts(
        name: &str,
        website: &str,
        booking_url: Option<String>,
        hours: Hours,
        source: DataSource,
    ) -> Self {
        Self {
            practitioner_name: name.to_string(),
            clinic_website: website.to_string(),
            booking_url: booking_url.unwrap_or_default(),
            weekday_earliest_am: hours.weekday_open,
            weekday_latest_pm: hours.weekday_close,
            weekend_earliest_am: hours.weekend_open,
            weekend_latest_pm: hours.weekend_close,
            days_closed: hours.days_closed,
            data_source: source,
        }
    }

    pub fn has_booking(&self) -> bool {
        !self.booking_url.is_empty()
    }

    pub fn has_hours(&self) -> bool {
        !(self.weekday_earliest_am.is_empty()
            && self.weekday_latest_pm.is_empty()
            && self.weekend_earliest_am.is_empty()
            && self.weekend_latest_pm.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_placeholder_is_blank() {
        let r = PractitionerRecord::new("Jo").with_website("Unknown").with_address("  ");
        assert_eq!(r.website, None);
        assert_eq!(r.address, None);
    }

    #[test]
    fn data_source_tags() {
        let tags: Vec<_> = DataSource::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(tags, ["clinic_website", "search_fallback", "api_fallback", "none"]);
        assert_eq!(DataSource::default(), DataSource::None);
    }

    #[test]
    fn closed_days_are_not_times() {
        let closed = Hours {
            days_closed: "Sunday".into(),
            ..Default::default()
        };
        assert!(!closed.has_times());
        let open = Hours {
            weekend_close: "02:00 PM".into(),
            ..closed
        };
        assert!(open.has_times());
    }

    #[test]
    fn empty_result_has_nothing() {
        let r = ExtractionResult::empty("Jo", "https://a.ca");
        assert!(!r.has_booking());
        assert!(!r.has_hours());
        assert_eq!(r.data_source, DataSource::None);
    }
}
