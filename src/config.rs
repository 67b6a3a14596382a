use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./recon.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// External worker wiring. With no endpoint configured, dispatches are
/// recorded locally but never leave the process.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Base URL the worker should call back on, e.g. `http://host:8787`.
    #[serde(default)]
    pub callback_base_url: Option<String>,
    /// Shared secret for callback signatures. Unset disables checking.
    #[serde(default)]
    pub callback_secret: Option<String>,
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            callback_base_url: None,
            callback_secret: None,
            platform: default_platform(),
        }
    }
}

fn default_platform() -> String {
    "amazon".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_fuzzy_floor")]
    pub fuzzy_similarity_floor: f64,
    #[serde(default = "default_description_floor")]
    pub description_similarity_floor: f64,
    /// Confidence at or above which a match counts as strong. Also the
    /// bound below which the demo comparator may activate.
    #[serde(default = "default_strong_confidence")]
    pub strong_confidence: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Skip the external search when this many internal candidates
    /// already carry a resolved affiliate link.
    #[serde(default = "default_skip_min_monetizable")]
    pub skip_external_min_monetizable: usize,
    /// Skip the external search when this many internal candidates
    /// exist at all.
    #[serde(default = "default_skip_min_total")]
    pub skip_external_min_total: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_similarity_floor: default_fuzzy_floor(),
            description_similarity_floor: default_description_floor(),
            strong_confidence: default_strong_confidence(),
            max_results: default_max_results(),
            skip_external_min_monetizable: default_skip_min_monetizable(),
            skip_external_min_total: default_skip_min_total(),
        }
    }
}

fn default_fuzzy_floor() -> f64 {
    0.7
}
fn default_description_floor() -> f64 {
    0.4
}
fn default_strong_confidence() -> f64 {
    0.7
}
fn default_max_results() -> usize {
    5
}
fn default_skip_min_monetizable() -> usize {
    2
}
fn default_skip_min_total() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: i64,
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: i64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl(),
            result_ttl_secs: default_result_ttl(),
        }
    }
}

fn default_pending_ttl() -> i64 {
    86_400
}
fn default_result_ttl() -> i64 {
    3_600
}

#[derive(Debug, Deserialize, Clone)]
pub struct DemoConfig {
    #[serde(default = "default_discount_pct")]
    pub discount_pct: f64,
    #[serde(default = "default_demo_manufacturer")]
    pub manufacturer_name: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            discount_pct: default_discount_pct(),
            manufacturer_name: default_demo_manufacturer(),
        }
    }
}

fn default_discount_pct() -> f64 {
    20.0
}
fn default_demo_manufacturer() -> String {
    "Demo Manufacturer".to_string()
}

/// Load configuration from a TOML file. A missing file yields the
/// built-in defaults so the binary runs with no setup.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.matching.fuzzy_similarity_floor) {
        anyhow::bail!("matching.fuzzy_similarity_floor must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.matching.description_similarity_floor) {
        anyhow::bail!("matching.description_similarity_floor must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.matching.strong_confidence) {
        anyhow::bail!("matching.strong_confidence must be in [0.0, 1.0]");
    }
    if config.matching.max_results < 1 {
        anyhow::bail!("matching.max_results must be >= 1");
    }
    if config.lookup.pending_ttl_secs < 1 || config.lookup.result_ttl_secs < 1 {
        anyhow::bail!("lookup TTLs must be >= 1 second");
    }
    if !(0.0..100.0).contains(&config.demo.discount_pct) {
        anyhow::bail!("demo.discount_pct must be in [0.0, 100.0)");
    }

    Ok(config)
}
