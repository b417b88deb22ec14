use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the histrelay process.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Monitoring database connection configuration.
    pub database: DatabaseConfig,

    /// Metrics proxy connection configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// Prefix prepended to every forwarded metric name. Normalized at load
    /// time to either the empty string or a trimmed value ending in one dot.
    #[serde(default)]
    pub prefix: String,

    /// Forward samples to the proxy. When false, the formatted lines are
    /// emitted through the log instead.
    #[serde(default)]
    pub forward: bool,

    /// Forward per-cycle instrumentation (sent rate, cycle time, query
    /// timings) through the proxy.
    #[serde(default)]
    pub self_metrics: bool,

    /// Origin reported on self-metrics.
    #[serde(default)]
    pub report_source: String,

    /// When set, per-source watermarks are persisted under this directory
    /// and reloaded at startup.
    #[serde(default)]
    pub watermark_dir: Option<PathBuf>,

    /// Fetch-cycle defaults applied to every source unless overridden.
    #[serde(default)]
    pub fetch: FetchDefaults,

    /// History tables to poll. One fetch controller runs per entry.
    pub sources: Vec<SourceConfig>,
}

/// Monitoring database connection configuration.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Database host. Default: "localhost".
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port. Default: 3306.
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database name. Default: "zabbix".
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Database user.
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: String,

    /// Connection pool size. Default: 5.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Metrics proxy connection configuration.
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host. Default: "localhost".
    #[serde(default = "default_proxy_host")]
    pub host: String,

    /// Proxy line-protocol port. Default: 2878.
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Enable the health metrics server. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: "0.0.0.0:9095".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

/// Fetch-cycle defaults, overridable per source.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchDefaults {
    /// Sleep between cycles that found less data than the limit. Default: 30s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Safety margin subtracted from the source clock when initializing a
    /// watermark, covering rows the source has not yet committed. Default: 1m.
    #[serde(default = "default_lag", with = "humantime_serde")]
    pub lag: Duration,

    /// Initial per-cycle row limit. Default: 5000.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Step applied when the rate controller adjusts the limit. Default: 500.
    #[serde(default = "default_increment")]
    pub increment: i64,

    /// Per-query timeout; zero disables it. Default: 30s.
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Run the cycle without querying or forwarding (timing dry-run).
    #[serde(default)]
    pub profile_only: bool,
}

impl Default for FetchDefaults {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            lag: default_lag(),
            batch_size: default_batch_size(),
            increment: default_increment(),
            query_timeout: default_query_timeout(),
            profile_only: false,
        }
    }
}

/// One history table to poll, with optional per-source overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// History table name (e.g. "history", "history_uint").
    pub table: String,

    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub lag: Option<Duration>,

    #[serde(default)]
    pub batch_size: Option<i64>,

    #[serde(default)]
    pub increment: Option<i64>,

    #[serde(default, with = "humantime_serde")]
    pub query_timeout: Option<Duration>,

    #[serde(default)]
    pub profile_only: Option<bool>,
}

/// Fully resolved fetch settings for one source.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub interval: Duration,
    pub lag: Duration,
    pub batch_size: i64,
    pub increment: i64,
    pub query_timeout: Duration,
    pub profile_only: bool,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration and normalize the prefix.
    pub fn validate(&mut self) -> Result<()> {
        if self.database.user.is_empty() {
            bail!("database.user is required");
        }

        if self.sources.is_empty() {
            bail!("at least one source table is required");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.table.is_empty() {
                bail!("source table name must not be empty");
            }
            if !source
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                bail!("source table name {:?} contains invalid characters", source.table);
            }
            if !seen.insert(source.table.as_str()) {
                bail!("source table {:?} is configured twice", source.table);
            }

            let settings = self.settings_for(source);
            if settings.batch_size <= 0 {
                bail!("batch_size for {:?} must be positive", source.table);
            }
            if settings.increment < 0 {
                bail!("increment for {:?} must not be negative", source.table);
            }
            if settings.interval.is_zero() {
                bail!("interval for {:?} must be positive", source.table);
            }
        }

        if self.forward && self.proxy.host.is_empty() {
            bail!("proxy.host is required when forwarding is enabled");
        }

        if self.self_metrics && self.report_source.is_empty() {
            bail!("report_source is required when self_metrics is enabled");
        }

        self.prefix = normalize_prefix(&self.prefix);

        Ok(())
    }

    /// Resolve defaults plus per-source overrides.
    pub fn settings_for(&self, source: &SourceConfig) -> SourceSettings {
        SourceSettings {
            interval: source.interval.unwrap_or(self.fetch.interval),
            lag: source.lag.unwrap_or(self.fetch.lag),
            batch_size: source.batch_size.unwrap_or(self.fetch.batch_size),
            increment: source.increment.unwrap_or(self.fetch.increment),
            query_timeout: source.query_timeout.unwrap_or(self.fetch.query_timeout),
            profile_only: source.profile_only.unwrap_or(self.fetch.profile_only),
        }
    }
}

/// Empty stays empty; anything else is trimmed and ends in exactly one dot.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}.", trimmed.trim_end_matches('.'))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "zabbix".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_proxy_host() -> String {
    "localhost".to_string()
}

fn default_proxy_port() -> u16 {
    2878
}

fn default_health_addr() -> String {
    "0.0.0.0:9095".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_lag() -> Duration {
    Duration::from_secs(60)
}

fn default_batch_size() -> i64 {
    5000
}

fn default_increment() -> i64 {
    500
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        serde_yaml::from_str(
            r"
            database:
              user: zabbix
            sources:
              - table: history
            ",
        )
        .expect("valid yaml")
    }

    #[test]
    fn test_minimal_config_defaults() {
        let mut cfg = minimal();
        cfg.validate().expect("valid config");

        assert_eq!(cfg.database.host, "localhost");
        assert_eq!(cfg.database.port, 3306);
        assert_eq!(cfg.proxy.port, 2878);
        assert!(!cfg.forward);
        assert_eq!(cfg.fetch.batch_size, 5000);
        assert_eq!(cfg.fetch.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_sources_rejected() {
        let mut cfg: Config = serde_yaml::from_str(
            r"
            database:
              user: zabbix
            sources: []
            ",
        )
        .expect("valid yaml");

        let err = cfg.validate().expect_err("empty sources rejected");
        assert!(err.to_string().contains("at least one source"));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut cfg: Config = serde_yaml::from_str(
            r"
            database:
              user: zabbix
            sources:
              - table: history
              - table: history
            ",
        )
        .expect("valid yaml");

        let err = cfg.validate().expect_err("duplicate rejected");
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn test_source_overrides_win() {
        let cfg: Config = serde_yaml::from_str(
            r"
            database:
              user: zabbix
            fetch:
              interval: 10s
              batch_size: 1000
            sources:
              - table: history
                batch_size: 250
              - table: history_uint
            ",
        )
        .expect("valid yaml");

        let overridden = cfg.settings_for(&cfg.sources[0]);
        assert_eq!(overridden.batch_size, 250);
        assert_eq!(overridden.interval, Duration::from_secs(10));

        let inherited = cfg.settings_for(&cfg.sources[1]);
        assert_eq!(inherited.batch_size, 1000);
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("  "), "");
        assert_eq!(normalize_prefix("zabbix"), "zabbix.");
        assert_eq!(normalize_prefix(" zabbix. "), "zabbix.");
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let mut cfg: Config = serde_yaml::from_str(
            r"
            database:
              user: zabbix
            sources:
              - table: 'history; drop table hosts'
            ",
        )
        .expect("valid yaml");

        let err = cfg.validate().expect_err("injection-shaped name rejected");
        assert!(err.to_string().contains("invalid characters"));
    }
}
