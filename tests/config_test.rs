//! Integration tests for configuration loading

use road_telemetry::domain::types::UserId;
use road_telemetry::infra::{Config, StoreMode};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[agent]
enabled = false
user_id = 42
tick_interval_ms = 0

[sources]
accelerometer = "/data/acc.csv"
gps = "/data/gps.csv"
parking = "/data/parking.csv"

[batch]
size = 5
flush_interval_ms = 2000
max_buffered = 50

[classifier]
baseline_z = 16000.0
rough_threshold = 1000.0
pothole_threshold = 3000.0

[store]
mode = "http"
db_path = "/var/lib/road/telemetry.db"
api_url = "http://hub:8000"
timeout_ms = 1500

[server]
enabled = false
bind_address = "127.0.0.1"
port = 9000
listener_queue = 16

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert!(!config.agent_enabled());
    assert_eq!(config.user_id(), UserId(42));
    assert_eq!(config.tick_interval_ms(), 0);
    assert_eq!(config.parking_file(), "/data/parking.csv");
    assert_eq!(config.batch_size(), 5);
    assert_eq!(config.flush_interval_ms(), 2000);
    assert_eq!(config.max_buffered(), 50);
    assert_eq!(config.pothole_threshold(), 3000.0);
    assert_eq!(config.store_mode(), StoreMode::Http);
    assert_eq!(config.store_api_url(), "http://hub:8000");
    assert_eq!(config.store_timeout_ms(), 1500);
    assert!(!config.server_enabled());
    assert_eq!(config.bind_address(), "127.0.0.1");
    assert_eq!(config.server_port(), 9000);
    assert_eq!(config.listener_queue(), 16);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_invalid_values_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[batch]\nsize = 20\nmax_buffered = 10\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("max_buffered"));
}

#[test]
fn test_unknown_store_mode_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[store]\nmode = \"carrier-pigeon\"\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.user_id(), UserId(1));
    assert_eq!(config.batch_size(), 10);
    assert_eq!(config.store_mode(), StoreMode::Local);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_load_uses_config_file_env_when_no_arg() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[agent]\nenabled = false\nuser_id = 9\n").unwrap();
    temp_file.flush().unwrap();

    // Only test in this binary that touches CONFIG_FILE
    std::env::set_var("CONFIG_FILE", temp_file.path());
    let from_env = Config::load(None);
    let from_arg = Config::load(Some("/nonexistent/config.toml"));
    std::env::remove_var("CONFIG_FILE");

    assert_eq!(from_env.user_id(), UserId(9));
    assert!(!from_env.agent_enabled());
    assert_eq!(from_env.config_file(), temp_file.path().display().to_string());
    assert_eq!(from_arg.config_file(), "default");
}
