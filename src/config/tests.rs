use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::Settings;
use super::{load_config_from, ENV_PREFIX};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.data_dir, "data");
    assert_eq!(settings.broker.catalog_file, "queues.json");
    assert_eq!(settings.broker.sweep_interval_ms, 1_000);
    assert_eq!(settings.broker.maintenance_interval_ms, 5_000);
    assert_eq!(settings.broker.log_level, "info");
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("absent");

    let settings = load_config_from(file.to_str().unwrap()).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_partial_file_is_merged_with_defaults() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("default.toml");
    fs::write(
        &file,
        "[broker]\ndata_dir = \"/var/lib/popqueue\"\nsweep_interval_ms = 250\n",
    )
    .unwrap();

    let base = dir.path().join("default");
    let settings = load_config_from(base.to_str().unwrap()).unwrap();
    assert_eq!(settings.broker.data_dir, "/var/lib/popqueue");
    assert_eq!(settings.broker.sweep_interval_ms, 250);
    assert_eq!(settings.broker.maintenance_interval_ms, 5_000);
    assert_eq!(settings.broker.log_level, "info");
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("default.toml");
    fs::write(&file, "[broker]\nlog_level = \"warn\"\n").unwrap();
    let base = dir.path().join("default");

    temp_env::with_vars(
        [
            (format!("{ENV_PREFIX}__BROKER__LOG_LEVEL"), Some("debug")),
            (format!("{ENV_PREFIX}__BROKER__MAINTENANCE_INTERVAL_MS"), Some("750")),
        ],
        || {
            let settings = load_config_from(base.to_str().unwrap()).unwrap();
            assert_eq!(settings.broker.log_level, "debug");
            assert_eq!(settings.broker.maintenance_interval_ms, 750);
            assert_eq!(settings.broker.data_dir, "data");
        },
    );
}
