use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Settings file looked up in the working directory (any format `config` knows).
const CONFIG_FILE: &str = "store_profiler";
const ENV_PREFIX: &str = "PROFILER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Minimum delay between two requests of the same endpoint fetch.
    pub min_request_interval_ms: u64,
    pub page_limit: usize,
    pub max_pages: usize,
    pub max_child_sitemaps: usize,
    pub max_collection_member_fetches: usize,
    /// Cluster count; derived from the catalog size when unset.
    pub clusters: Option<usize>,
    pub seed: u64,
    pub max_iterations: usize,
    pub top_terms: usize,
    pub output_dir: PathBuf,
    pub catalog_required: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: concat!("store_profiler/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 10,
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            min_request_interval_ms: 500,
            page_limit: 250,
            max_pages: 40,
            max_child_sitemaps: 20,
            max_collection_member_fetches: 25,
            clusters: None,
            seed: 42,
            max_iterations: 100,
            top_terms: 5,
            output_dir: PathBuf::from("data"),
            catalog_required: true,
        }
    }
}

impl Settings {
    /// Defaults, then `store_profiler.{toml,json,...}` if present, then `PROFILER_*` env vars.
    pub fn load() -> Result<Self> {
        Self::build(File::with_name(CONFIG_FILE).required(false))
    }

    /// Same as [`Settings::load`] but with an explicit settings file.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(File::from(path).required(true))
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read settings")?;
        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.page_limit > 0, "page_limit must be at least 1");
        anyhow::ensure!(self.max_pages > 0, "max_pages must be at least 1");
        anyhow::ensure!(self.request_timeout_secs > 0, "request_timeout_secs must be at least 1");
        anyhow::ensure!(self.max_iterations > 0, "max_iterations must be at least 1");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.max_retries, 3);
        assert!(s.catalog_required);
        assert_eq!(s.clusters, None);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_retries = 1\nclusters = 4\noutput_dir = \"out\"").unwrap();
        let s = Settings::load_from(file.path()).unwrap();
        assert_eq!(s.max_retries, 1);
        assert_eq!(s.clusters, Some(4));
        assert_eq!(s.output_dir, PathBuf::from("out"));
        assert_eq!(s.page_limit, 250);
    }

    #[test]
    fn rejects_zero_page_limit() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "page_limit = 0").unwrap();
        assert!(Settings::load_from(file.path()).is_err());
    }
}
