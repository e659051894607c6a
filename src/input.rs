use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::StringRecord;
use tracing::{info, warn};

use crate::model::{non_empty, PractitionerRecord};

// ── Header aliases ──

const NAME_ALIASES: &[&str] = &["practitioner_name", "name", "practitioner"];
const WEBSITE_ALIASES: &[&str] = &["clinic_website", "website", "clinic website", "url"];
const ADDRESS_ALIASES: &[&str] = &["address", "street address", "street_address"];
const CLINIC_ALIASES: &[&str] = &["clinic_name", "clinic/facility name", "clinic"];

/// Column positions resolved from the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Columns {
    name: usize,
    website: Option<usize>,
    address: Option<usize>,
    clinic: Option<usize>,
}

impl Columns {
    /// Known aliases first; with no recognised header at all, fall back to
    /// name, website, address by position.
    fn resolve(headers: &StringRecord) -> Self {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.iter().any(|a| h.trim().eq_ignore_ascii_case(a)))
        };
        let name = find(NAME_ALIASES);
        let website = find(WEBSITE_ALIASES);
        let address = find(ADDRESS_ALIASES);
        let clinic = find(CLINIC_ALIASES);

        if name.is_none() && website.is_none() && address.is_none() && clinic.is_none() {
            warn!("No known column headers; using positional columns (name, website, address)");
            return Self {
                name: 0,
                website: (headers.len() > 1).then_some(1),
                address: (headers.len() > 2).then_some(2),
                clinic: None,
            };
        }

        Self {
            name: name.unwrap_or(0),
            website,
            address,
            clinic,
        }
    }
}

pub fn load_records(path: &Path) -> Result<Vec<PractitionerRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open input {}", path.display()))?;
    let records = read_records(file).with_context(|| format!("Malformed input {}", path.display()))?;
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

pub fn read_records<R: std::io::Read>(reader: R) -> Result<Vec<PractitionerRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read header row")?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        bail!("Input has no header row");
    }
    let cols = Columns::resolve(&headers);

    let cell = |row: &StringRecord, idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .and_then(|v| non_empty(v.to_string()))
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (i, row) in rdr.records().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let row = row.with_context(|| format!("Bad CSV row at line {}", line))?;
        let Some(name) = cell(&row, Some(cols.name)) else {
            warn!("Skipping line {}: empty practitioner name", line);
            skipped += 1;
            continue;
        };
        records.push(PractitionerRecord {
            name,
            website: cell(&row, cols.website),
            address: cell(&row, cols.address),
            clinic_name: cell(&row, cols.clinic),
        });
    }

    if skipped > 0 {
        warn!("Skipped {} rows without a name", skipped);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(csv: &str) -> Vec<PractitionerRecord> {
        read_records(csv.as_bytes()).unwrap()
    }

    #[test]
    fn aliased_headers_any_order() {
        let recs = read(
            "Street Address,Clinic/Facility Name,Practitioner_Name,Website\n\
             12 Main St,Coast Therapy,Igor Sobolev,coasttherapy.ca\n",
        );
        assert_eq!(
            recs,
            vec![PractitionerRecord::new("Igor Sobolev")
                .with_website("coasttherapy.ca")
                .with_address("12 Main St")
                .with_clinic_name("Coast Therapy")]
        );
    }

    #[test]
    fn positional_fallback() {
        let recs = read("a,b,c\nJane Doe,https://jd.ca,Vernon BC\nJohn Roe\n");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].website.as_deref(), Some("https://jd.ca"));
        assert_eq!(recs[0].address.as_deref(), Some("Vernon BC"));
        assert_eq!(recs[1], PractitionerRecord::new("John Roe"));
    }

    #[test]
    fn empty_names_skipped_and_unknown_is_blank() {
        let recs = read("name,url\n ,https://x.ca\nAnn Lee,Unknown\nBo Park,\n");
        let names: Vec<&str> = recs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Ann Lee", "Bo Park"]);
        assert!(recs.iter().all(|r| r.website.is_none()));
    }

    #[test]
    fn known_headers_without_name_use_first_column() {
        let recs = read("Full Name,website\nAnn Lee,ann.ca\n");
        assert_eq!(recs[0].name, "Ann Lee");
        assert_eq!(recs[0].website.as_deref(), Some("ann.ca"));
        assert_eq!(recs[0].address, None);
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = load_records(Path::new("/nonexistent/input.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open input"));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "practitioner_name,clinic_website\nAnn Lee,ann.ca\n").unwrap();
        assert_eq!(load_records(&path).unwrap().len(), 1);
    }
}
