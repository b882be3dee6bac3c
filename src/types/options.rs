//! Builder-style configuration passed into each pipeline component at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHECKPOINT_PATH, DEFAULT_SLEEP_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
    FALLBACK_URL_TEMPLATE, MAX_POOL_WORKERS, PRIMARY_URL_TEMPLATE, RATE_LIMITED_STATUS,
};
use crate::error::{CellfetchError, Result};

/// Shape of the lookup service's response body. Chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// `{"errcode":0,"lat":..,"lon":..,"radius":..,"address":..}`
    #[default]
    Json,
    /// `errcode,lat,lon,radius,address`
    Delimited,
}

/// How work is scheduled onto fetchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Scheduling {
    /// One fetch in flight; a throttle stall blocks everything.
    #[default]
    Sequential,
    /// `workers` fetches in flight; a throttle stall blocks only one worker.
    Pool { workers: usize },
}

impl Scheduling {
    /// Pool sized to the machine, clamped to a sane range.
    #[must_use]
    pub fn pool_default() -> Self {
        Self::Pool {
            workers: num_cpus::get().clamp(1, MAX_POOL_WORKERS),
        }
    }
}

/// Everything the fetch client needs to build and classify requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub primary_url: String,
    /// `None` disables the fallback attempt; throttled items go straight back to the queue.
    pub fallback_url: Option<String>,
    pub user_agent: String,
    pub rate_limit_status: u16,
    pub timeout_ms: u64,
    pub format: ResponseFormat,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            primary_url: PRIMARY_URL_TEMPLATE.to_string(),
            fallback_url: Some(FALLBACK_URL_TEMPLATE.to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit_status: RATE_LIMITED_STATUS,
            timeout_ms: DEFAULT_TIMEOUT_SECS * 1_000,
            format: ResponseFormat::Json,
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn primary_url(mut self, template: impl Into<String>) -> Self {
        self.primary_url = template.into();
        self
    }

    #[must_use]
    pub fn fallback_url(mut self, template: Option<String>) -> Self {
        self.fallback_url = template;
        self
    }

    #[must_use]
    pub fn format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Knobs for the queue, retry policy and sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Pause after a throttled item is requeued.
    pub sleep_ms: u64,
    /// Drop an item after this many requeues. `None` retries until the quota resets.
    pub max_requeues: Option<u32>,
    /// Prepend the hex `key` column to every output row.
    pub generate_key: bool,
    pub scheduling: Scheduling,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            sleep_ms: DEFAULT_SLEEP_SECS * 1_000,
            max_requeues: None,
            generate_key: false,
            scheduling: Scheduling::Sequential,
        }
    }
}

impl PipelineOptions {
    #[must_use]
    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep_ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn max_requeues(mut self, limit: Option<u32>) -> Self {
        self.max_requeues = limit;
        self
    }

    #[must_use]
    pub fn generate_key(mut self, enabled: bool) -> Self {
        self.generate_key = enabled;
        self
    }

    #[must_use]
    pub fn scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    #[must_use]
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellfetchConfig {
    pub source: Option<PathBuf>,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub fetch: FetchConfig,
    pub pipeline: PipelineOptions,
}

impl Default for CellfetchConfig {
    fn default() -> Self {
        Self {
            source: None,
            output: default_output_path(),
            checkpoint: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            fetch: FetchConfig::default(),
            pipeline: PipelineOptions::default(),
        }
    }
}

impl CellfetchConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs_err::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn source_path(&self) -> Result<&Path> {
        self.source
            .as_deref()
            .ok_or_else(|| CellfetchError::InvalidConfig {
                reason: "a source file is required".into(),
            })
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        self.source_path()?;
        if self.fetch.primary_url.trim().is_empty() {
            return Err(CellfetchError::InvalidConfig {
                reason: "primary url template is empty".into(),
            });
        }
        if let Scheduling::Pool { workers } = self.pipeline.scheduling {
            if workers == 0 || workers > MAX_POOL_WORKERS {
                return Err(CellfetchError::InvalidConfig {
                    reason: format!("pool workers must be within 1..={MAX_POOL_WORKERS}, got {workers}"),
                });
            }
        }
        Ok(())
    }
}

/// `results/cell_towers_YYYYMMDD.csv` relative to the working directory.
#[must_use]
pub fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d");
    PathBuf::from("results").join(format!("cell_towers_{stamp}.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_config_keeps_defaults() {
        let config: CellfetchConfig = serde_json::from_str(
            r#"{"source":"cells.csv","pipeline":{"sleep_ms":5,"scheduling":{"mode":"pool","workers":4}}}"#,
        )
        .expect("parse config");
        assert_eq!(config.source.as_deref(), Some(Path::new("cells.csv")));
        assert_eq!(config.pipeline.sleep_ms, 5);
        assert_eq!(config.pipeline.scheduling, Scheduling::Pool { workers: 4 });
        assert_eq!(config.fetch, FetchConfig::default());
        config.validate().expect("valid");
    }

    #[test]
    fn validate_requires_source_and_sane_pool() {
        let missing = CellfetchConfig::default();
        assert!(matches!(
            missing.validate(),
            Err(CellfetchError::InvalidConfig { .. })
        ));

        let mut zero_pool = CellfetchConfig {
            source: Some(PathBuf::from("cells.csv")),
            ..CellfetchConfig::default()
        };
        zero_pool.pipeline.scheduling = Scheduling::Pool { workers: 0 };
        assert!(zero_pool.validate().is_err());
    }

    #[test]
    fn default_output_is_dated() {
        let path = default_output_path();
        let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
        assert!(name.starts_with("cell_towers_"));
        assert_eq!(name.len(), "cell_towers_YYYYMMDD.csv".len());
    }
}
