use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Search-query codes: model name -> site model code.
    pub car_codes: BTreeMap<String, String>,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub filters: YearFilter,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_ad_url")]
    pub ad_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub request_delay_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            ad_url: default_ad_url(),
            max_pages: default_max_pages(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: 0,
        }
    }
}

fn default_search_url() -> String {
    "https://www.finn.no/car/used/search.html?model=".to_string()
}
fn default_ad_url() -> String {
    "https://www.finn.no/car/used/ad.html?finnkode=".to_string()
}
fn default_max_pages() -> u32 {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}

/// Optional model-year range applied to every search query.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearFilter {
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl StorageConfig {
    /// Directory holding one raw page per ad identifier.
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("ads")
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join("ads.parquet")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8501
}

/// A configured (model name, site code, year filter) tuple driving one crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub name: String,
    pub code: String,
    pub years: YearFilter,
}

impl Config {
    pub fn search_queries(&self) -> Vec<SearchQuery> {
        self.car_codes
            .iter()
            .map(|(name, code)| SearchQuery {
                name: name.clone(),
                code: code.clone(),
                years: self.filters,
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.car_codes.is_empty() {
            bail!("[car_codes] must list at least one model");
        }
        if let (Some(from), Some(to)) = (self.filters.year_from, self.filters.year_to) {
            if from > to {
                bail!("[filters] year_from ({}) is after year_to ({})", from, to);
            }
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let c = parse_config("[car_codes]\nmodel_3 = \"1.8078.2000501\"\n").unwrap();
        assert_eq!(c.scraper.max_pages, 50);
        assert_eq!(c.scraper.max_retries, 3);
        assert_eq!(c.dashboard.port, 8501);
        assert_eq!(c.storage.raw_dir(), PathBuf::from("data/ads"));
        assert_eq!(c.storage.dataset_path(), PathBuf::from("data/ads.parquet"));
        assert_eq!(c.filters, YearFilter::default());
    }

    #[test]
    fn queries_carry_year_filter() {
        let c = parse_config(
            "[car_codes]\nmodel_3 = \"a\"\nioniq_5 = \"b\"\n[filters]\nyear_from = 2020\nyear_to = 2023\n",
        )
        .unwrap();
        let q = c.search_queries();
        assert_eq!(q.len(), 2);
        assert_eq!(q[0].name, "ioniq_5");
        assert_eq!(q[1].code, "a");
        assert!(q.iter().all(|x| x.years.year_from == Some(2020) && x.years.year_to == Some(2023)));
    }

    #[test]
    fn empty_car_codes_rejected() {
        assert!(parse_config("[car_codes]\n").is_err());
    }

    #[test]
    fn inverted_years_rejected() {
        let err = parse_config("[car_codes]\na = \"1\"\n[filters]\nyear_from = 2024\nyear_to = 2020\n");
        assert!(err.is_err());
    }

    #[test]
    fn missing_file_is_error() {
        assert!(load_config(Path::new("does/not/exist.toml")).is_err());
    }

    #[test]
    fn malformed_toml_is_error() {
        assert!(parse_config("[car_codes\nmodel_3 = ").is_err());
    }

    #[test]
    fn shipped_config_loads() {
        let c = load_config(Path::new("config.toml")).unwrap();
        assert!(c.car_codes.contains_key("model_3"));
        assert_eq!(c.filters.year_from, Some(2019));
        assert_eq!(c.dashboard.port, 8501);
    }
}
