use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetch::PageFetcher;
use crate::model::{ExtractionResult, PractitionerRecord};
use crate::output::{self, Coverage};
use crate::resolver::{self, SearchEngine};
use crate::sources::{self, ExtractionSource, LookupContext, Outcome};

// ── Pacing ──

/// Inter-record delay. Grows by `multiplier` after a rate-limit signal, up to
/// `max`, and drops back to `base` after a clean record.
#[derive(Debug, Clone)]
pub struct Pacer {
    base: Duration,
    jitter: Duration,
    multiplier: f64,
    max: Duration,
    current: Duration,
}

impl Pacer {
    pub fn new(settings: &Settings) -> Self {
        let base = settings.base_delay();
        Self {
            base,
            jitter: settings.jitter(),
            multiplier: settings.rate_limit_multiplier.max(1.0),
            max: settings.max_delay(),
            current: base,
        }
    }

    /// Update after a record and return the delay without jitter.
    pub fn record(&mut self, rate_limited: bool) -> Duration {
        self.current = if rate_limited {
            let from = self.current.max(Duration::from_secs(1));
            let cap = self.max.max(from);
            Duration::try_from_secs_f64(from.as_secs_f64() * self.multiplier)
                .map_or(cap, |d| d.min(cap))
        } else {
            self.base
        };
        self.current
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Sleep for the current delay plus random jitter.
    pub fn wait(&self) {
        let mut delay = self.current;
        if !self.jitter.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
            delay = delay.saturating_add(Duration::try_from_secs_f64(extra).unwrap_or(self.jitter));
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

// ── Stats ──

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub coverage: Coverage,
    pub resumed: usize,
    pub processed: usize,
    pub failures: usize,
    pub rate_limited: usize,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn print(&self) {
        println!(
            "Processed {} records in {:.1}s ({} resumed, {} tier errors, {} rate-limit slowdowns).",
            self.processed,
            self.elapsed.as_secs_f64(),
            self.resumed,
            self.failures,
            self.rate_limited
        );
        self.coverage.print();
    }
}

pub struct RunOptions {
    pub checkpoint: Option<PathBuf>,
    /// Results from an earlier checkpoint; the matching prefix is reused.
    pub resume: Vec<ExtractionResult>,
    pub progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            checkpoint: None,
            resume: Vec::new(),
            progress: true,
        }
    }
}

// ── Pipeline ──

pub struct Pipeline<'a> {
    settings: &'a Settings,
    fetcher: &'a dyn PageFetcher,
    engine: &'a dyn SearchEngine,
    sources: Vec<Box<dyn ExtractionSource>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        fetcher: &'a dyn PageFetcher,
        engine: &'a dyn SearchEngine,
    ) -> Self {
        Self {
            settings,
            fetcher,
            engine,
            sources: sources::default_chain(settings),
        }
    }

    #[cfg(test)]
    pub fn with_sources(mut self, sources: Vec<Box<dyn ExtractionSource>>) -> Self {
        self.sources = sources;
        self
    }

    /// Resolve a website, then walk the fallback chain. Never fails.
    pub fn lookup(&self, record: &PractitionerRecord) -> Outcome {
        let resolution = resolver::resolve(record, self.settings, self.fetcher, self.engine);
        let ctx = LookupContext {
            record,
            website: resolution.website.as_deref(),
            hits: &resolution.hits,
            settings: self.settings,
            fetcher: self.fetcher,
            engine: self.engine,
        };
        let mut outcome = sources::run_chain(&ctx, &self.sources);
        outcome.rate_limited |= resolution.rate_limited;
        outcome
    }

    /// One result per record, in input order. Only checkpoint I/O problems
    /// are reported, and those as warnings.
    pub fn run(
        &self,
        records: &[PractitionerRecord],
        opts: RunOptions,
    ) -> Result<(Vec<ExtractionResult>, RunStats)> {
        let t0 = Instant::now();
        let mut results = resume_prefix(records, opts.resume);
        let mut stats = RunStats {
            coverage: Coverage::of(&results),
            resumed: results.len(),
            ..Default::default()
        };
        if stats.resumed > 0 {
            info!("Resuming after {} checkpointed records", stats.resumed);
        }

        let pb = if opts.progress {
            ProgressBar::new(records.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta}) {msg}")?
                .progress_chars("=> "),
        );
        pb.set_position(results.len() as u64);

        let mut pacer = Pacer::new(self.settings);
        let interval = self.settings.checkpoint_interval;
        let start = results.len();

        for (i, record) in records.iter().enumerate().skip(start) {
            pb.set_message(record.name.clone());
            let outcome = self.lookup(record);

            stats.processed += 1;
            stats.failures += outcome.failures;
            stats.coverage.add(&outcome.result);
            if outcome.rate_limited {
                stats.rate_limited += 1;
            }
            results.push(outcome.result);
            pb.inc(1);

            if let Some(path) = &opts.checkpoint {
                if interval > 0 && results.len() % interval == 0 {
                    match output::write_results(path, &results) {
                        Ok(()) => info!("Checkpoint: {} results -> {}", results.len(), path.display()),
                        Err(e) => warn!("Checkpoint failed: {:#}", e),
                    }
                }
            }

            pacer.record(outcome.rate_limited);
            if outcome.rate_limited {
                warn!("Rate limited; next delay {:.1}s", pacer.current().as_secs_f64());
            }
            if i + 1 < records.len() {
                pacer.wait();
            }
        }

        pb.finish_and_clear();
        stats.elapsed = t0.elapsed();
        info!(
            "Done: {} records, {} with booking URL, {} with hours",
            results.len(),
            stats.coverage.booking,
            stats.coverage.hours
        );
        Ok((results, stats))
    }
}

/// Longest prefix of `prior` whose names line up with `records`.
pub fn resume_prefix(
    records: &[PractitionerRecord],
    prior: Vec<ExtractionResult>,
) -> Vec<ExtractionResult> {
    let total = prior.len();
    let matched: Vec<ExtractionResult> = prior
        .into_iter()
        .zip(records)
        .take_while(|(r, rec)| r.practitioner_name == rec.name)
        .map(|(r, _)| r)
        .collect();
    if matched.len() < total {
        warn!(
            "Checkpoint has {} rows but only the first {} match the input; reprocessing the rest",
            total,
            matched.len()
        );
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::fake::FakeFetcher;
    use crate::model::DataSource;
    use crate::places::fixtures as places;
    use crate::resolver::fake::FakeSearch;

    fn quiet() -> Settings {
        Settings {
            delay_secs: 0.0,
            guess_domains: false,
            checkpoint_interval: 2,
            ..Default::default()
        }
    }

    fn opts(checkpoint: Option<PathBuf>) -> RunOptions {
        RunOptions {
            checkpoint,
            progress: false,
            ..Default::default()
        }
    }

    fn records() -> Vec<PractitionerRecord> {
        vec![
            PractitionerRecord::new("Igor Sobolev").with_website("coasttherapy.ca"),
            PractitionerRecord::new("Slow Clinic").with_website("https://slow.ca"),
            PractitionerRecord::new("Nobody"),
        ]
    }

    fn fetcher() -> FakeFetcher {
        FakeFetcher::new()
            .page(
                "https://coasttherapy.ca/",
                r#"<a href="https://coasttherapy.janeapp.com/">Book</a><p>Mon-Fri 9am-5pm</p>"#,
            )
            .fail(
                "https://slow.ca/",
                FetchError::Timeout {
                    url: "https://slow.ca/".into(),
                },
            )
    }

    #[test]
    fn one_result_per_record_in_order() {
        let settings = quiet();
        let fetcher = fetcher();
        let search = FakeSearch::default();
        let (results, stats) = Pipeline::new(&settings, &fetcher, &search)
            .run(&records(), opts(None))
            .unwrap();

        let names: Vec<&str> = results.iter().map(|r| r.practitioner_name.as_str()).collect();
        assert_eq!(names, ["Igor Sobolev", "Slow Clinic", "Nobody"]);

        assert_eq!(results[0].booking_url, "https://coasttherapy.janeapp.com/");
        assert_eq!(results[0].clinic_website, "https://coasttherapy.ca/");
        assert_eq!(results[0].data_source, DataSource::ClinicWebsite);

        assert_eq!(results[1], ExtractionResult::empty("Slow Clinic", "https://slow.ca/"));
        assert_eq!(results[2], ExtractionResult::empty("Nobody", ""));

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.coverage.booking, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn checkpoint_holds_first_n() {
        let dir = tempfile::tempdir().unwrap();
        let cp = dir.path().join("out.checkpoint.csv");
        let settings = quiet();
        let fetcher = fetcher();
        let search = FakeSearch::default();
        let (results, _) = Pipeline::new(&settings, &fetcher, &search)
            .run(&records(), opts(Some(cp.clone())))
            .unwrap();

        let saved = output::read_results(&cp).unwrap();
        assert_eq!(saved, results[..2]);
    }

    #[test]
    fn resume_skips_checkpointed_records() {
        let settings = quiet();
        let fetcher = fetcher();
        let search = FakeSearch::default();
        let pipeline = Pipeline::new(&settings, &fetcher, &search);
        let prior = vec![
            ExtractionResult::empty("Igor Sobolev", "https://coasttherapy.ca/"),
            ExtractionResult::empty("Slow Clinic", "https://slow.ca/"),
        ];
        let (results, stats) = pipeline
            .run(
                &records(),
                RunOptions {
                    resume: prior.clone(),
                    ..opts(None)
                },
            )
            .unwrap();

        assert_eq!(results[..2], prior[..]);
        assert_eq!(results.len(), 3);
        assert_eq!(stats.resumed, 2);
        assert_eq!(stats.processed, 1);
        assert!(!fetcher.calls().iter().any(|u| u.contains("coasttherapy") || u.contains("slow")));
    }

    #[test]
    fn resume_prefix_stops_at_mismatch() {
        let prior = vec![
            ExtractionResult::empty("Igor Sobolev", ""),
            ExtractionResult::empty("Someone Else", ""),
            ExtractionResult::empty("Nobody", ""),
        ];
        assert_eq!(resume_prefix(&records(), prior).len(), 1);
        assert!(resume_prefix(&records(), Vec::new()).is_empty());
    }

    #[test]
    fn rerun_is_identical() {
        let settings = quiet();
        let fetcher = fetcher();
        let search = FakeSearch::default();
        let pipeline = Pipeline::new(&settings, &fetcher, &search);
        let (first, _) = pipeline.run(&records(), opts(None)).unwrap();
        let (second, _) = pipeline.run(&records(), opts(None)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn lookup_without_website_uses_places_hours() {
        let settings = Settings {
            google_api_key: Some(places::KEY.into()),
            ..quiet()
        };
        let details = r#"{"status":"OK","result":{"opening_hours":{"weekday_text":
            ["Mon-Fri 8:00 AM-5:00 PM","Sat 9:00 AM-2:00 PM","Sun Closed"]}}}"#;
        let fetcher = FakeFetcher::new()
            .page(&places::search_url("Jane Doe clinic"), places::SEARCH_OK)
            .page(&places::details_url("p1"), details);
        let search = FakeSearch::default();
        let out = Pipeline::new(&settings, &fetcher, &search).lookup(&PractitionerRecord::new("Jane Doe"));

        assert_eq!(out.result.data_source, DataSource::ApiFallback);
        assert_eq!(out.result.clinic_website, "");
        assert_eq!(out.result.booking_url, "");
        assert_eq!(out.result.weekday_earliest_am, "08:00 AM");
        assert_eq!(out.result.weekday_latest_pm, "05:00 PM");
        assert_eq!(out.result.weekend_earliest_am, "09:00 AM");
        assert_eq!(out.result.weekend_latest_pm, "02:00 PM");
        assert_eq!(out.result.days_closed, "Sunday");
        assert_eq!(out.failures, 0);
        assert!(!search.queries.borrow().is_empty());
    }

    struct Always(DataSource);

    impl ExtractionSource for Always {
        fn tag(&self) -> DataSource {
            self.0
        }

        fn attempt(
            &self,
            ctx: &LookupContext<'_>,
        ) -> Result<Option<sources::Found>, crate::error::SourceError> {
            Ok(Some(sources::Found {
                booking_url: Some(format!("https://book.test/{}", ctx.record.name)),
                ..Default::default()
            }))
        }
    }

    #[test]
    fn first_successful_source_wins() {
        let settings = quiet();
        let fetcher = fetcher();
        let search = FakeSearch::default();
        let pipeline = Pipeline::new(&settings, &fetcher, &search).with_sources(vec![
            Box::new(sources::SearchSnippet),
            Box::new(Always(DataSource::ApiFallback)),
            Box::new(Always(DataSource::ClinicWebsite)),
        ]);
        let out = pipeline.lookup(&PractitionerRecord::new("Nobody"));
        assert_eq!(out.result.booking_url, "https://book.test/Nobody");
        assert_eq!(out.result.data_source, DataSource::ApiFallback);
    }

    #[test]
    fn pacer_backs_off_and_relaxes() {
        let settings = Settings {
            delay_secs: 2.0,
            rate_limit_multiplier: 3.0,
            max_delay_secs: 10.0,
            ..Default::default()
        };
        let mut pacer = Pacer::new(&settings);
        assert_eq!(pacer.current(), Duration::from_secs(2));
        assert_eq!(pacer.record(true), Duration::from_secs(6));
        assert_eq!(pacer.record(true), Duration::from_secs(10));
        assert_eq!(pacer.record(true), Duration::from_secs(10));
        assert_eq!(pacer.record(false), Duration::from_secs(2));
    }

    #[test]
    fn pacer_survives_absurd_settings() {
        let settings = Settings {
            delay_secs: 1e30,
            rate_limit_multiplier: 1e300,
            max_delay_secs: f64::INFINITY,
            ..Default::default()
        };
        let mut pacer = Pacer::new(&settings);
        let backed_off = pacer.record(true);
        assert!(backed_off >= settings.base_delay());
        assert_eq!(pacer.record(true), backed_off);

        let mut small = Pacer::new(&Settings {
            delay_secs: 1.0,
            rate_limit_multiplier: 1e300,
            max_delay_secs: 30.0,
            ..Default::default()
        });
        assert_eq!(small.record(true), Duration::from_secs(30));
    }

    #[test]
    fn pacer_with_zero_base_still_backs_off() {
        let settings = Settings {
            delay_secs: 0.0,
            rate_limit_multiplier: 2.0,
            max_delay_secs: 5.0,
            ..Default::default()
        };
        let mut pacer = Pacer::new(&settings);
        assert_eq!(pacer.record(true), Duration::from_secs(2));
        assert_eq!(pacer.record(false), Duration::ZERO);
    }
}
