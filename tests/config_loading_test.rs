//! Configuration loading from TOML files and environment overrides.

use biowatch_core::config::MonitorConfig;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = MonitorConfig::load_from("/nonexistent/biowatch.toml").unwrap();
    assert_eq!(config.acquisition.window_len, 50);
    assert_eq!(config.acquisition.slide_len, 12);
    assert_eq!(config.gain.step_down, 25);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_file_overrides_only_named_keys() {
    let file = write_config(
        r#"
[acquisition]
window_len = 100
slide_len = 25

[quality]
required_consecutive = 3

[quality.red]
ceiling = 200000
floor = 12000
min_pulsatile = 2500
"#,
    );

    let config = MonitorConfig::load_from(file.path()).unwrap();

    assert_eq!(config.acquisition.window_len, 100);
    assert_eq!(config.acquisition.slide_len, 25);
    assert_eq!(config.acquisition.sample_timeout_ms, 100);
    assert_eq!(config.quality.required_consecutive, 3);
    assert_eq!(config.quality.red.floor, 12_000);
    assert_eq!(config.quality.red.max_pulsatile, None);
    assert_eq!(config.quality.ir.floor, 20_000);
    assert_eq!(config.gain.initial, 60);
    assert!(config.validate().is_ok());
}

#[test]
fn test_semantically_invalid_file_loads_but_fails_validation() {
    let file = write_config(
        r#"
[gain]
min = 100
max = 50
"#,
    );

    let config = MonitorConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("gain min"));
}

#[test]
fn test_wrong_type_is_a_load_error() {
    let file = write_config(
        r#"
[acquisition]
window_len = "fifty"
"#,
    );

    assert!(MonitorConfig::load_from(file.path()).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[smoothing]
max_jump = 25
history_len = 4
"#,
    );

    std::env::set_var("BIOWATCH_SMOOTHING__MAX_JUMP", "15");
    let loaded = MonitorConfig::load_from(file.path());
    std::env::remove_var("BIOWATCH_SMOOTHING__MAX_JUMP");

    let config = loaded.unwrap();
    assert_eq!(config.smoothing.max_jump, 15);
    assert_eq!(config.smoothing.history_len, 4);
}

#[test]
fn test_dumped_defaults_load_back_identically() {
    let dumped = MonitorConfig::default().to_toml().unwrap();
    let file = write_config(&dumped);

    let config = MonitorConfig::load_from(file.path()).unwrap();
    assert_eq!(config.acquisition, MonitorConfig::default().acquisition);
    assert_eq!(config.quality, MonitorConfig::default().quality);
}
