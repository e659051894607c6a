use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "BOOKING";
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Everything one batch run needs to know. Owned by the pipeline, never global.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub google_api_key: Option<String>,
    /// Base pause between records.
    pub delay_secs: f64,
    /// Extra random pause in `0..=jitter_secs`.
    pub jitter_secs: f64,
    /// Delay growth factor after a rate-limit signal.
    pub rate_limit_multiplier: f64,
    pub max_delay_secs: f64,
    pub checkpoint_interval: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Appended to search queries, e.g. "physiotherapy".
    pub search_keyword: String,
    pub max_search_results: usize,
    pub guess_domains: bool,
    /// Follow keyword booking links and probe common booking paths.
    pub deep_booking_scan: bool,
    pub probe_paths: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            google_api_key: None,
            delay_secs: 2.0,
            jitter_secs: 0.0,
            rate_limit_multiplier: 3.0,
            max_delay_secs: 120.0,
            checkpoint_interval: 25,
            timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            search_keyword: "clinic".to_string(),
            max_search_results: 5,
            guess_domains: true,
            deep_booking_scan: true,
            probe_paths: 5,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `BOOKING_*` environment variables. A bare
    /// `GOOGLE_API_KEY` is honoured when `BOOKING_GOOGLE_API_KEY` is unset.
    pub fn from_env() -> Result<Self> {
        let mut settings: Settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read BOOKING_* environment")?
            .try_deserialize()
            .context("Invalid BOOKING_* setting")?;

        if settings.google_api_key.is_none() {
            settings.google_api_key = std::env::var(GOOGLE_API_KEY_VAR).ok();
        }
        settings.google_api_key = settings
            .google_api_key
            .take()
            .filter(|k| !k.trim().is_empty());
        Ok(settings)
    }

    pub fn api_enabled(&self) -> bool {
        self.google_api_key.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn base_delay(&self) -> Duration {
        secs(self.delay_secs)
    }

    pub fn jitter(&self) -> Duration {
        secs(self.jitter_secs)
    }

    pub fn max_delay(&self) -> Duration {
        secs(self.max_delay_secs).max(self.base_delay())
    }
}

/// Longest pause any setting can ask for.
const MAX_PAUSE_SECS: f64 = 86_400.0;

fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::from_secs_f64(value.min(MAX_PAUSE_SECS))
    } else {
        Duration::ZERO
    }
}
