mod config;
mod db;
mod error;
mod fetch;
mod input;
mod model;
mod output;
mod parser;
mod pipeline;
mod places;
mod resolver;
mod sources;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use config::Settings;
use fetch::{HttpFetcher, PageFetcher};
use model::PractitionerRecord;
use pipeline::{Pipeline, RunOptions};
use resolver::DuckDuckGo;

#[derive(Parser)]
#[command(name = "booking_finder", about = "Find booking links and opening hours for clinics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a CSV of practitioners and write one result row per record
    Run {
        /// Input CSV (name, website, address columns)
        #[arg(short, long)]
        input: PathBuf,
        /// Output CSV
        #[arg(short, long, default_value = "booking_results.csv")]
        output: PathBuf,
        /// Checkpoint file (default: <output stem>.checkpoint.csv)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Max records to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Continue from the checkpoint file
        #[arg(long)]
        resume: bool,
        /// SQLite page cache; reruns replay stored responses
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Look up a single practitioner and print the result
    Lookup {
        name: String,
        #[arg(short, long)]
        website: Option<String>,
        #[arg(short, long)]
        address: Option<String>,
        /// Clinic/facility name, used for search and domain guessing
        #[arg(long)]
        clinic: Option<String>,
        #[arg(long)]
        cache: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Coverage summary of an output or checkpoint CSV
    Stats {
        file: PathBuf,
    },
}

/// Overrides for `BOOKING_*` environment settings.
#[derive(Args)]
struct Tuning {
    /// Places API key (else GOOGLE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Seconds between records
    #[arg(long)]
    delay: Option<f64>,
    /// Random extra seconds added to the delay
    #[arg(long)]
    jitter: Option<f64>,
    /// Write a checkpoint every N records
    #[arg(long)]
    checkpoint_interval: Option<usize>,
    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Keyword appended to website searches (e.g. "physiotherapy")
    #[arg(long)]
    keyword: Option<String>,
    /// Search results to consider
    #[arg(long)]
    max_results: Option<usize>,
    /// Don't guess domains from the clinic name
    #[arg(long)]
    no_guess: bool,
    /// Don't follow booking links or probe booking paths
    #[arg(long)]
    no_deep_scan: bool,
}

impl Tuning {
    fn settings(self) -> anyhow::Result<Settings> {
        let mut s = Settings::from_env()?;
        if let Some(key) = self.api_key.filter(|k| !k.trim().is_empty()) {
            s.google_api_key = Some(key);
        }
        if let Some(v) = self.delay {
            s.delay_secs = v;
        }
        if let Some(v) = self.jitter {
            s.jitter_secs = v;
        }
        if let Some(v) = self.checkpoint_interval {
            s.checkpoint_interval = v;
        }
        if let Some(v) = self.timeout {
            s.timeout_secs = v;
        }
        if let Some(v) = self.keyword {
            s.search_keyword = v;
        }
        if let Some(v) = self.max_results {
            s.max_search_results = v;
        }
        s.guess_domains &= !self.no_guess;
        s.deep_booking_scan &= !self.no_deep_scan;
        Ok(s)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            checkpoint,
            limit,
            resume,
            cache,
            no_progress,
            tuning,
        } => {
            let settings = tuning.settings()?;
            let mut records = input::load_records(&input)?;
            if let Some(n) = limit {
                records.truncate(n);
            }
            if records.is_empty() {
                println!("No records in {}.", input.display());
                return Ok(());
            }

            let checkpoint = checkpoint.unwrap_or_else(|| output::default_checkpoint_path(&output));
            let prior = if !resume {
                Vec::new()
            } else if checkpoint.exists() {
                output::read_results(&checkpoint)?
            } else {
                warn!("No checkpoint at {}; starting fresh", checkpoint.display());
                Vec::new()
            };
            if !settings.api_enabled() {
                info!("No Places API key; API fallback disabled");
            }

            let fetcher = build_fetcher(&settings, cache.as_deref())?;
            let engine = DuckDuckGo::default();
            println!("Processing {} records...", records.len());
            let (results, stats) = Pipeline::new(&settings, fetcher.as_ref(), &engine).run(
                &records,
                RunOptions {
                    checkpoint: Some(checkpoint),
                    resume: prior,
                    progress: !no_progress,
                },
            )?;

            output::write_results(&output, &results)?;
            println!("Wrote {} results to {}", results.len(), output.display());
            stats.print();
            Ok(())
        }
        Commands::Lookup {
            name,
            website,
            address,
            clinic,
            cache,
            tuning,
        } => {
            let settings = tuning.settings()?;
            let mut record = PractitionerRecord::new(name.trim());
            if let Some(w) = website {
                record = record.with_website(w);
            }
            if let Some(a) = address {
                record = record.with_address(a);
            }
            if let Some(c) = clinic {
                record = record.with_clinic_name(c);
            }

            let fetcher = build_fetcher(&settings, cache.as_deref())?;
            let engine = DuckDuckGo::default();
            let outcome = Pipeline::new(&settings, fetcher.as_ref(), &engine).lookup(&record);
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            Ok(())
        }
        Commands::Stats { file } => {
            let results = output::read_results(&file)?;
            if results.is_empty() {
                println!("No results in {}.", file.display());
                return Ok(());
            }
            output::Coverage::of(&results).print();
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_fetcher(settings: &Settings, cache: Option<&Path>) -> anyhow::Result<Box<dyn PageFetcher>> {
    let http = HttpFetcher::new(settings)?;
    let Some(path) = cache else {
        return Ok(Box::new(http));
    };
    let conn = db::connect(path).with_context(|| format!("Cache {}", path.display()))?;
    let cached = db::CachedFetcher::new(http, conn);
    info!("Page cache {} ({} pages stored)", path.display(), cached.stored()?);
    Ok(Box::new(cached))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
