use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore, RedisCheckpointStore};
use crate::region::{self, FileRegionSource, Region, RegionSource, StaticRegion};

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Where POIs and credentials are stored
// - Where collection checkpoints live
// - The active region
// - Enabled providers and their throttling / retry parameters
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// SQLite database holding POIs and credentials
    pub database: DatabaseConfig,

    /// Checkpoint backend
    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    /// Active region (preset, file, or inline)
    pub region: RegionConfig,

    /// Credentials inserted into the pool on startup if not present
    #[serde(default)]
    pub credentials: Vec<CredentialSeed>,

    /// List of provider configurations
    pub providers: Vec<ProviderConfig>,

    /// Seconds between metrics log lines (0 disables the reporter)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

// ------------------------------------------------------------
// Checkpoint backend
// ------------------------------------------------------------
//
// - file:  one JSON document per provider/strategy in `dir`
// - redis: one key per provider/strategy under `prefix`
//
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointConfig {
    File {
        dir: PathBuf,
    },
    Redis {
        url: String,
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig::File {
            dir: PathBuf::from("progress"),
        }
    }
}

impl CheckpointConfig {
    /// Builds the configured backend. Redis is connected lazily.
    pub fn open(&self) -> Result<Arc<dyn CheckpointStore>> {
        Ok(match self {
            CheckpointConfig::File { dir } => Arc::new(FileCheckpointStore::new(dir)),
            CheckpointConfig::Redis { url, prefix } => {
                Arc::new(RedisCheckpointStore::new(url, prefix.as_str())?)
            }
        })
    }
}

// ------------------------------------------------------------
// Region selection
// ------------------------------------------------------------
//
// Exactly one of the three fields must be set.
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RegionConfig {
    /// Built-in preset key, e.g. "funing"
    pub preset: Option<String>,

    /// JSON file re-read at the start of every work unit
    pub file: Option<PathBuf>,

    /// Region given directly in the config
    pub inline: Option<Region>,
}

impl RegionConfig {
    pub fn source(&self) -> Result<Box<dyn RegionSource>> {
        match (&self.preset, &self.file, &self.inline) {
            (Some(key), None, None) => {
                let region = region::preset(key).with_context(|| {
                    format!(
                        "unknown region preset '{}' (available: {})",
                        key,
                        region::preset_keys().collect::<Vec<_>>().join(", ")
                    )
                })?;
                Ok(Box::new(StaticRegion(region)))
            }
            (None, Some(path), None) => Ok(Box::new(FileRegionSource::new(path))),
            (None, None, Some(region)) => {
                region.validate()?;
                Ok(Box::new(StaticRegion(region.clone())))
            }
            _ => bail!("region: set exactly one of `preset`, `file` or `inline`"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialSeed {
    pub provider: String,
    pub secret: String,
    #[serde(default)]
    pub name: String,
}

// ------------------------------------------------------------
// Provider configuration
// ------------------------------------------------------------
//
// Configuration for a single provider collection.
//
// Each provider runs independently with its own limiter,
// credential lease and checkpoint.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider identifier ("tianditu", "amap", "baidu")
    pub name: String,

    /// Enables or disables this provider at startup
    pub enabled: bool,

    /// Enumeration strategy for this collection
    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Continue from the stored checkpoint instead of starting over
    #[serde(default = "default_true")]
    pub resume: bool,
}

// ------------------------------------------------------------
// Enumeration strategy
// ------------------------------------------------------------
//
// Chosen once per collection; never changes mid-run.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StrategyConfig {
    /// Category × keyword sweep; empty `categories` means all
    Keywords {
        #[serde(default)]
        categories: Vec<String>,
    },

    /// Provider type-code sweep; empty `codes` means the provider defaults
    Types {
        #[serde(default)]
        codes: Vec<String>,
    },

    /// Row-major grid of cell centers, one spatial query per cell
    Grid {
        /// Cell size in degrees (0.02° ≈ 2 km)
        #[serde(default = "default_grid_step")]
        step_deg: f64,

        /// Search radius for providers that query around a point
        #[serde(default = "default_grid_radius")]
        radius_m: u32,

        /// Search term for providers that require one
        #[serde(default)]
        keyword: Option<String>,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Keywords {
            categories: Vec::new(),
        }
    }
}

impl StrategyConfig {
    /// Stable name used in checkpoint keys.
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::Keywords { .. } => "keywords",
            StrategyConfig::Types { .. } => "types",
            StrategyConfig::Grid { .. } => "grid",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RateConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

// ------------------------------------------------------------
// Retry policy
// ------------------------------------------------------------
//
// - transport failures back off linearly: retry_delay × attempt
// - HTTP 429 cools down for rate_limit_cooldown × attempt
//
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            rate_limit_cooldown_ms: default_cooldown_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Raises the default log level to debug
    pub log: Option<bool>,
}

fn default_true() -> bool {
    true
}
fn default_metrics_interval() -> u64 {
    30
}
fn default_redis_prefix() -> String {
    "poi:checkpoint".to_string()
}
fn default_grid_step() -> f64 {
    0.02
}
fn default_grid_radius() -> u32 {
    1500
}
fn default_rps() -> f64 {
    2.0
}
fn default_burst() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_cooldown_ms() -> u64 {
    5000
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Period of the metrics log line; `None` when disabled.
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_secs > 0).then(|| Duration::from_secs(self.metrics_interval_secs))
    }

    pub fn debug_logging(&self) -> bool {
        self.debug
            .as_ref()
            .is_some_and(|d| d.log.unwrap_or(false))
    }

    /// Checks semantics serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for p in &self.providers {
            if !seen.insert(p.name.as_str()) {
                bail!("provider '{}' is configured twice", p.name);
            }
            if crate::providers::get_adapter(&p.name).is_none() {
                bail!("provider '{}' is not supported", p.name);
            }
            if !(p.rate.requests_per_second > 0.0) {
                bail!("{}: rate.requests_per_second must be > 0", p.name);
            }
            if p.retry.max_retries == 0 {
                bail!("{}: retry.max_retries must be >= 1", p.name);
            }
            if let StrategyConfig::Grid { step_deg, .. } = p.strategy {
                if !(step_deg > 0.0) {
                    bail!("{}: strategy.step_deg must be > 0", p.name);
                }
            }
        }

        for c in &self.credentials {
            if c.secret.trim().is_empty() {
                bail!("credential for '{}' has an empty secret", c.provider);
            }
        }

        self.region.source()?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk, deserializes it into
// the strongly typed `Config` structure and validates it.
//
pub fn load_config(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "database": { "path": "poi.db" },
        "region": { "preset": "funing" },
        "providers": [
            { "name": "amap", "enabled": true }
        ]
    }"#;

    #[test]
    fn defaults_fill_in() {
        let cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        let p = &cfg.providers[0];
        assert_eq!(p.strategy, StrategyConfig::Keywords { categories: vec![] });
        assert_eq!(p.rate.burst, 5);
        assert_eq!(p.retry.max_retries, 3);
        assert!(p.resume);
        assert!(matches!(cfg.checkpoints, CheckpointConfig::File { .. }));
        assert!(!cfg.debug_logging());
    }

    #[test]
    fn zero_metrics_interval_disables_reporter() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        assert!(cfg.metrics_interval().is_some());

        cfg.metrics_interval_secs = 0;
        assert_eq!(cfg.metrics_interval(), None);

        cfg.metrics_interval_secs = 15;
        assert_eq!(cfg.metrics_interval(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn grid_strategy_parses() {
        let json = r#"{ "kind": "grid", "step_deg": 0.05 }"#;
        let s: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(s.name(), "grid");
        match s {
            StrategyConfig::Grid { step_deg, radius_m, keyword } => {
                assert_eq!(step_deg, 0.05);
                assert_eq!(radius_m, 1500);
                assert!(keyword.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn redis_checkpoints_parse() {
        let json = r#"{ "backend": "redis", "url": "redis://127.0.0.1/" }"#;
        let c: CheckpointConfig = serde_json::from_str(json).unwrap();
        match c {
            CheckpointConfig::Redis { prefix, .. } => assert_eq!(prefix, "poi:checkpoint"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_provider_and_duplicates() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.providers[0].name = "osm".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.providers.push(cfg.providers[0].clone());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_ambiguous_region() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();
        cfg.region.file = Some(PathBuf::from("region.json"));
        assert!(cfg.validate().is_err());
    }
}
