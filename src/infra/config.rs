//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

use crate::domain::types::UserId;

/// Where the producer pipeline persists its batches
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Embedded SQLite database shared with the HTTP API
    Local,
    /// Remote store API reached over HTTP
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Run the producer pipeline in this process
    #[serde(default = "default_agent_enabled")]
    pub enabled: bool,
    #[serde(default = "default_user_id")]
    pub user_id: i64,
    /// Delay between aggregation ticks (0 = run as fast as possible)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: default_agent_enabled(),
            user_id: default_user_id(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_agent_enabled() -> bool {
    true
}

fn default_user_id() -> i64 {
    1
}

fn default_tick_interval_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_accelerometer_file")]
    pub accelerometer: String,
    #[serde(default = "default_gps_file")]
    pub gps: String,
    #[serde(default = "default_parking_file")]
    pub parking: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            accelerometer: default_accelerometer_file(),
            gps: default_gps_file(),
            parking: default_parking_file(),
        }
    }
}

fn default_accelerometer_file() -> String {
    "data/accelerometer.csv".to_string()
}

fn default_gps_file() -> String {
    "data/gps.csv".to_string()
}

fn default_parking_file() -> String {
    "data/parking.csv".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many samples are buffered
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Also flush a non-empty buffer this often (0 to disable)
    #[serde(default)]
    pub flush_interval_ms: u64,
    /// Retained samples allowed while saves keep failing
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { size: default_batch_size(), flush_interval_ms: 0, max_buffered: default_max_buffered() }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_buffered() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Resting z-axis reading (gravity) in raw sensor units
    #[serde(default = "default_baseline_z")]
    pub baseline_z: f64,
    #[serde(default = "default_rough_threshold")]
    pub rough_threshold: f64,
    #[serde(default = "default_pothole_threshold")]
    pub pothole_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            baseline_z: default_baseline_z(),
            rough_threshold: default_rough_threshold(),
            pothole_threshold: default_pothole_threshold(),
        }
    }
}

fn default_baseline_z() -> f64 {
    16500.0
}

fn default_rough_threshold() -> f64 {
    1500.0
}

fn default_pothole_threshold() -> f64 {
    4000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_mode")]
    pub mode: StoreMode,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Base URL of the remote store API (http mode)
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: default_store_mode(),
            db_path: default_db_path(),
            api_url: default_api_url(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_store_mode() -> StoreMode {
    StoreMode::Local
}

fn default_db_path() -> String {
    "data/road_telemetry.db".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Serve the store API and live feed from this process
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Outbound queue depth per live-feed listener
    #[serde(default = "default_listener_queue")]
    pub listener_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind_address: default_bind_address(),
            port: default_server_port(),
            listener_queue: default_listener_queue(),
        }
    }
}

fn default_server_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_listener_queue() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    agent_enabled: bool,
    user_id: UserId,
    tick_interval_ms: u64,
    accelerometer_file: String,
    gps_file: String,
    parking_file: String,
    batch_size: usize,
    flush_interval_ms: u64,
    max_buffered: usize,
    baseline_z: f64,
    rough_threshold: f64,
    pothole_threshold: f64,
    store_mode: StoreMode,
    db_path: String,
    store_api_url: String,
    store_timeout_ms: u64,
    server_enabled: bool,
    bind_address: String,
    server_port: u16,
    listener_queue: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            agent_enabled: toml_config.agent.enabled,
            user_id: UserId(toml_config.agent.user_id),
            tick_interval_ms: toml_config.agent.tick_interval_ms,
            accelerometer_file: toml_config.sources.accelerometer,
            gps_file: toml_config.sources.gps,
            parking_file: toml_config.sources.parking,
            batch_size: toml_config.batch.size,
            flush_interval_ms: toml_config.batch.flush_interval_ms,
            max_buffered: toml_config.batch.max_buffered,
            baseline_z: toml_config.classifier.baseline_z,
            rough_threshold: toml_config.classifier.rough_threshold,
            pothole_threshold: toml_config.classifier.pothole_threshold,
            store_mode: toml_config.store.mode,
            db_path: toml_config.store.db_path,
            store_api_url: toml_config.store.api_url,
            store_timeout_ms: toml_config.store.timeout_ms,
            server_enabled: toml_config.server.enabled,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            listener_queue: toml_config.server.listener_queue,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine the config file path: command line value, then `CONFIG_FILE`, then default
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        Self::choose_config_path(cli, env::var("CONFIG_FILE").ok())
    }

    fn choose_config_path(cli: Option<&str>, env_path: Option<String>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }
        match env_path {
            Some(path) if !path.is_empty() => path,
            _ => "config/dev.toml".to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch.size must be at least 1");
        anyhow::ensure!(
            self.max_buffered >= self.batch_size,
            "batch.max_buffered ({}) must not be below batch.size ({})",
            self.max_buffered,
            self.batch_size
        );
        anyhow::ensure!(self.listener_queue > 0, "server.listener_queue must be at least 1");
        Ok(())
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - resolves the path from the command line value or env first
    pub fn load(cli: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli))
    }

    pub fn agent_enabled(&self) -> bool {
        self.agent_enabled
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn accelerometer_file(&self) -> &str {
        &self.accelerometer_file
    }

    pub fn gps_file(&self) -> &str {
        &self.gps_file
    }

    pub fn parking_file(&self) -> &str {
        &self.parking_file
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_interval_ms(&self) -> u64 {
        self.flush_interval_ms
    }

    pub fn max_buffered(&self) -> usize {
        self.max_buffered
    }

    pub fn baseline_z(&self) -> f64 {
        self.baseline_z
    }

    pub fn rough_threshold(&self) -> f64 {
        self.rough_threshold
    }

    pub fn pothole_threshold(&self) -> f64 {
        self.pothole_threshold
    }

    pub fn store_mode(&self) -> StoreMode {
        self.store_mode
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn store_api_url(&self) -> &str {
        &self.store_api_url
    }

    pub fn store_timeout_ms(&self) -> u64 {
        self.store_timeout_ms
    }

    pub fn server_enabled(&self) -> bool {
        self.server_enabled
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn listener_queue(&self) -> usize {
        self.listener_queue
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point the sources at fixture files
    pub fn with_sources(mut self, accelerometer: &str, gps: &str, parking: &str) -> Self {
        self.accelerometer_file = accelerometer.to_string();
        self.gps_file = gps.to_string();
        self.parking_file = parking.to_string();
        self
    }

    /// Builder method for tests to set the batch trigger
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder method for tests to set the tick interval
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.agent_enabled());
        assert_eq!(config.user_id(), UserId(1));
        assert_eq!(config.batch_size(), 10);
        assert_eq!(config.flush_interval_ms(), 0);
        assert_eq!(config.max_buffered(), 10_000);
        assert_eq!(config.store_mode(), StoreMode::Local);
        assert_eq!(config.server_port(), 8000);
        assert_eq!(config.accelerometer_file(), "data/accelerometer.csv");
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_config_path_default() {
        assert_eq!(Config::choose_config_path(None, None), "config/dev.toml");
        assert_eq!(Config::choose_config_path(None, Some(String::new())), "config/dev.toml");
    }

    #[test]
    fn test_config_path_from_env() {
        let env_path = Some("config/agent.toml".to_string());
        assert_eq!(Config::choose_config_path(None, env_path), "config/agent.toml");
    }

    #[test]
    fn test_config_path_arg_beats_env() {
        let env_path = Some("config/agent.toml".to_string());
        assert_eq!(
            Config::choose_config_path(Some("config/hub.toml"), env_path),
            "config/hub.toml"
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str("[batch]\nsize = 25\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.batch_size(), 25);
        assert_eq!(config.max_buffered(), 10_000);
        assert_eq!(config.tick_interval_ms(), 500);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }
}
