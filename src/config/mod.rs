//! Configuration management for the backfill engine
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::calendar::ChunkGranularity;
use crate::coverage::CoverageBasis;
use crate::error::{Error, Result};
use crate::models::Frequency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings shared by all adapters
    #[serde(default)]
    pub http: HttpConfig,

    /// Backfill runner settings
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Contradiction detector thresholds
    #[serde(default)]
    pub contradiction: ContradictionConfig,

    /// Coverage map settings
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Freshness SLA thresholds
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// Adapter-wide settings (country codes)
    #[serde(default)]
    pub adapters: AdapterConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User agent string
    #[serde(default = "default_http_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Maximum redirects followed per request
    #[serde(default = "default_http_max_redirects")]
    pub max_redirects: usize,
}

/// Backfill runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Steps inside a yearly chunk: year, month or day
    #[serde(default = "default_backfill_granularity")]
    pub granularity: ChunkGranularity,

    /// Retries after a failed fetch
    #[serde(default = "default_backfill_max_retries")]
    pub max_retries: u32,

    /// Backoff unit in milliseconds (attempt n waits n * backoff)
    #[serde(default = "default_backfill_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Entries kept in a checkpoint's error log
    #[serde(default = "default_backfill_error_log_limit")]
    pub error_log_limit: usize,

    /// Jobs run concurrently by `run --all`
    #[serde(default = "default_backfill_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

/// Contradiction detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionConfig {
    /// Variance (percent) above which a contradiction is recorded
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold_percent: f64,

    /// Variance (percent) above which a contradiction is classed critical
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold_percent: f64,
}

/// Coverage map configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Expected timeline: native frequency periods or strict daily presence
    #[serde(default = "default_coverage_basis")]
    pub basis: CoverageBasis,

    /// Earliest year considered, even if a product is available earlier
    #[serde(default = "default_coverage_start_year")]
    pub start_year: i32,

    /// Gap drivers listed per sector/regime rollup
    #[serde(default = "default_coverage_gap_driver_limit")]
    pub gap_driver_limit: usize,
}

/// Warning/critical staleness thresholds in days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaThreshold {
    pub warning_days: i64,
    pub critical_days: i64,
}

impl SlaThreshold {
    pub fn new(warning_days: i64, critical_days: i64) -> Self {
        Self {
            warning_days,
            critical_days,
        }
    }
}

/// Freshness SLA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_daily_sla")]
    pub daily: SlaThreshold,

    #[serde(default = "default_weekly_sla")]
    pub weekly: SlaThreshold,

    #[serde(default = "default_monthly_sla")]
    pub monthly: SlaThreshold,

    #[serde(default = "default_quarterly_sla")]
    pub quarterly: SlaThreshold,

    #[serde(default = "default_annual_sla")]
    pub annual: SlaThreshold,

    /// Recorded as the creator of auto-filed gap tickets
    #[serde(default = "default_freshness_ticket_actor")]
    pub ticket_actor: String,
}

impl FreshnessConfig {
    /// Threshold row for a native frequency
    pub fn threshold(&self, frequency: Frequency) -> SlaThreshold {
        match frequency {
            Frequency::Daily => self.daily,
            Frequency::Weekly => self.weekly,
            Frequency::Monthly => self.monthly,
            Frequency::Quarterly => self.quarterly,
            Frequency::Annual => self.annual,
        }
    }
}

/// Adapter-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// ISO 3166 alpha-2 code (World Bank, IMF)
    #[serde(default = "default_country_iso2")]
    pub country_iso2: String,

    /// ISO 3166 alpha-3 code (UNHCR, OCHA FTS)
    #[serde(default = "default_country_iso3")]
    pub country_iso3: String,

    /// Country name (WFP VAM)
    #[serde(default = "default_country_name")]
    pub country_name: String,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for engine data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Path to the source registry TOML
    pub registry_file: PathBuf,

    /// Directory holding manual/partner drop files
    pub drops_dir: PathBuf,
}

impl PathsConfig {
    fn under(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.toml"),
            db_file: base.join("engine.db"),
            registry_file: base.join("registry.toml"),
            drops_dir: base.join("drops"),
            base_dir: base,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_http_user_agent(),
            timeout_secs: default_http_timeout(),
            max_redirects: default_http_max_redirects(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            granularity: default_backfill_granularity(),
            max_retries: default_backfill_max_retries(),
            retry_backoff_ms: default_backfill_retry_backoff(),
            error_log_limit: default_backfill_error_log_limit(),
            max_concurrent_jobs: default_backfill_max_concurrent_jobs(),
        }
    }
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            variance_threshold_percent: default_variance_threshold(),
            critical_threshold_percent: default_critical_threshold(),
        }
    }
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            basis: default_coverage_basis(),
            start_year: default_coverage_start_year(),
            gap_driver_limit: default_coverage_gap_driver_limit(),
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            daily: default_daily_sla(),
            weekly: default_weekly_sla(),
            monthly: default_monthly_sla(),
            quarterly: default_quarterly_sla(),
            annual: default_annual_sla(),
            ticket_actor: default_freshness_ticket_actor(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            country_iso2: default_country_iso2(),
            country_iso3: default_country_iso3(),
            country_name: default_country_name(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.backfill)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".backfill")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::under(base);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Data files live next to the config file
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base);
        config.paths.config_file = config_path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if the engine is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(Error::Config(
                "http.timeout_secs must be positive".to_string(),
            ));
        }

        if self.backfill.error_log_limit == 0 {
            return Err(Error::Config(
                "backfill.error_log_limit must be at least 1".to_string(),
            ));
        }

        if self.backfill.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "backfill.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }

        let c = &self.contradiction;
        if c.variance_threshold_percent <= 0.0 {
            return Err(Error::Config(
                "contradiction.variance_threshold_percent must be positive".to_string(),
            ));
        }
        if c.critical_threshold_percent < c.variance_threshold_percent {
            return Err(Error::Config(
                "contradiction.critical_threshold_percent must be >= variance_threshold_percent"
                    .to_string(),
            ));
        }

        for frequency in Frequency::ALL {
            let t = self.freshness.threshold(frequency);
            if t.warning_days <= 0 || t.critical_days <= t.warning_days {
                return Err(Error::Config(format!(
                    "freshness.{}: need 0 < warning_days < critical_days",
                    frequency
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backfill.max_retries, 3);
        assert_eq!(config.backfill.error_log_limit, 100);
        assert_eq!(config.contradiction.variance_threshold_percent, 15.0);
        assert_eq!(config.freshness.threshold(Frequency::Annual).critical_days, 730);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.backfill.granularity = ChunkGranularity::Month;
        config.freshness.monthly = SlaThreshold::new(30, 60);

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.backfill.granularity, ChunkGranularity::Month);
        assert_eq!(loaded.freshness.monthly, SlaThreshold::new(30, 60));
        assert_eq!(loaded.paths.db_file, tmp.path().join("engine.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[contradiction]\ncritical_threshold_percent = 50.0\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.contradiction.critical_threshold_percent, 50.0);
        assert_eq!(config.contradiction.variance_threshold_percent, 15.0);
        assert_eq!(config.adapters.country_iso3, "YEM");
        assert_eq!(config.paths.registry_file, tmp.path().join("registry.toml"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.contradiction.critical_threshold_percent = 10.0;
        assert!(config.validate().is_err());
        config.contradiction.critical_threshold_percent = 30.0;

        config.freshness.daily = SlaThreshold::new(7, 7);
        assert!(config.validate().is_err());
        config.freshness.daily = SlaThreshold::new(2, 7);

        assert!(config.validate().is_ok());
    }
}
