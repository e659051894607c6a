use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::model::{DataSource, ExtractionResult};

/// `results/out.csv` → `results/out.checkpoint.csv`.
pub fn default_checkpoint_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    output.with_file_name(format!("{}.checkpoint.csv", stem))
}

/// Write all results, replacing `path` atomically (temp sibling + rename).
pub fn write_results(path: &Path, results: &[ExtractionResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }

    let tmp = temp_path(path);
    {
        let mut wtr = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        // Header must exist even when there are no rows yet.
        if results.is_empty() {
            wtr.write_record(COLUMNS)?;
        }
        for r in results {
            wtr.serialize(r)?;
        }
        wtr.flush()
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    debug!("Wrote {} rows to {}", results.len(), path.display());
    Ok(())
}

pub fn read_results(path: &Path) -> Result<Vec<ExtractionResult>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    rdr.deserialize::<ExtractionResult>()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("{}: bad row {}", path.display(), i + 2)))
        .collect()
}

const COLUMNS: [&str; 9] = [
    "practitioner_name",
    "clinic_website",
    "booking_url",
    "weekday_earliest_am",
    "weekday_latest_pm",
    "weekend_earliest_am",
    "weekend_latest_pm",
    "days_closed",
    "data_source",
];

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Coverage ──

/// How many results found what.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub total: usize,
    pub booking: usize,
    pub hours: usize,
    /// Indexed like `DataSource::ALL`.
    pub by_source: [usize; 4],
}

impl Coverage {
    pub fn of(results: &[ExtractionResult]) -> Self {
        let mut c = Self::default();
        for r in results {
            c.add(r);
        }
        c
    }

    pub fn add(&mut self, r: &ExtractionResult) {
        self.total += 1;
        self.booking += r.has_booking() as usize;
        self.hours += r.has_hours() as usize;
        if let Some(i) = DataSource::ALL.iter().position(|s| *s == r.data_source) {
            self.by_source[i] += 1;
        }
    }

    pub fn count(&self, source: DataSource) -> usize {
        DataSource::ALL
            .iter()
            .position(|s| *s == source)
            .map(|i| self.by_source[i])
            .unwrap_or(0)
    }

    pub fn print(&self) {
        println!("Records:      {}", self.total);
        println!("Booking URLs: {} ({})", self.booking, pct(self.booking, self.total));
        println!("Hours:        {} ({})", self.hours, pct(self.hours, self.total));
        for source in DataSource::ALL {
            let n = self.count(source);
            println!("  {:<16} {:>5} ({})", source.as_str(), n, pct(n, self.total));
        }
    }
}

fn pct(n: usize, total: usize) -> String {
    if total == 0 {
        "-".to_string()
    } else {
        format!("{:.1}%", n as f64 * 100.0 / total as f64)
    }
}
