//! Configuration loading from YAML layers in a temporary directory

use prospect_core::config::ConfigManager;
use prospect_core::tier::{Tier, TierPolicyResolver};
use prospect_core::EnrichmentGateway;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BASE: &str = r#"
cache:
  enabled: true
  backend: memory
  format_version: v-test
  min_store_interval_seconds: 30

tiers:
  ttl_env_prefix: PROSPECT_TEST_UNSET_TTL
  starter:
    ttl_days: 120
  compliance:
    ttl_seconds: 3600

circuit_breakers:
  enabled: true
  default_config:
    failure_threshold: 5
    cooldown_ms: 60000
  component_configs:
    hunter:
      failure_threshold: 2
      cooldown_ms: 15000

usage_ledger:
  enabled: true
  sink: memory
  channel_capacity: 32
  shutdown_timeout_ms: 500
"#;

fn write_config(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

fn config_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_config(dir.path(), "prospect-config.yaml", BASE);
    dir
}

#[test]
fn test_base_file_loads_and_validates() {
    let dir = config_dir();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "development").unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(config.cache.backend, "memory");
    assert_eq!(config.cache.format_version, "v-test");
    assert_eq!(config.circuit_breakers.config_for_component("hunter").failure_threshold, 2);
    assert_eq!(config.circuit_breakers.config_for_component("cobalt").failure_threshold, 5);
    assert!(!config.uses_database());
}

#[test]
fn test_environment_file_overrides_base() {
    let dir = config_dir();
    write_config(
        dir.path(),
        "prospect-config.staging.yaml",
        "cache:\n  backend: noop\ndownstream:\n  max_attempts: 1\n",
    );

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging").unwrap();
    assert_eq!(manager.config().cache.backend, "noop");
    assert_eq!(manager.config().downstream.max_attempts, 1);
    assert_eq!(manager.config().usage_ledger.channel_capacity, 32);
}

#[test]
fn test_tier_ttls_from_config() {
    let dir = config_dir();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();
    let resolver = TierPolicyResolver::from_config(&manager.config().tiers);

    assert_eq!(resolver.resolve_tier(Tier::Starter).ttl_seconds, 120 * 86_400);
    assert_eq!(resolver.resolve_tier(Tier::Compliance).ttl_seconds, 3600);
    assert_eq!(resolver.resolve_tier(Tier::Professional).ttl_seconds, 45 * 86_400);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = config_dir();
    write_config(dir.path(), "prospect-config.broken.yaml", "cache:\n  backend: redis\n");

    let err = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "broken")
        .unwrap_err();
    assert!(err.to_string().contains("cache.backend"));
}

#[test]
fn test_missing_directory_reports_searched_paths() {
    let missing = PathBuf::from("/nonexistent/prospect-config-dir");
    let err = ConfigManager::load_from_directory_with_env(Some(missing), "test").unwrap_err();
    assert!(err.to_string().contains("prospect-config"));
}

#[tokio::test]
async fn test_bootstrap_from_loaded_config_without_database() {
    let dir = config_dir();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test").unwrap();

    let (gateway, worker) = EnrichmentGateway::bootstrap(manager.config(), None);
    assert_eq!(gateway.cache().provider().provider_name(), "memory");
    assert_eq!(gateway.cache().key_generator().version(), "v-test");
    assert!(gateway.ledger().is_enabled());

    assert!(gateway.ledger().shutdown().await.success);
    worker.unwrap().await.unwrap();
}
