use host::HostConfig;
use host::config::load_config;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("host.toml");

    let mut config = HostConfig::default();
    config.usb.device_index = 3;
    config.usb.max_attempts = 2;
    config.usb.reset_on_connect = false;
    config.logging.level = "debug".to_string();
    config.save(&path).unwrap();

    let loaded = HostConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.usb.device_index, 3);
    assert_eq!(loaded.usb.max_attempts, 2);
    assert!(!loaded.usb.reset_on_connect);
    assert_eq!(loaded.logging.level, "debug");

    let settings = loaded.transfer_settings();
    assert_eq!(settings.max_attempts, 2);
    assert!(!settings.reset_on_connect);
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = HostConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("host.toml");
    fs::write(&path, "[usb\nvendor_id = ").unwrap();

    let err = HostConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("host.toml");

    fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
    assert!(HostConfig::load(Some(path.clone())).is_err());

    fs::write(&path, "[usb]\nmax_attempts = 0\n").unwrap();
    assert!(HostConfig::load(Some(path.clone())).is_err());

    fs::write(&path, "[usb]\ndevice_index = 9\n").unwrap();
    assert!(HostConfig::load(Some(path)).is_err());
}

#[test]
fn test_load_config_from_str_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("host.toml");
    fs::write(
        &path,
        "[usb]\ntransfer_timeout_ms = 1500\nreset_settle_ms = 10\n",
    )
    .unwrap();

    let config = load_config(path.to_str().unwrap()).unwrap();
    let settings = config.transfer_settings();
    assert_eq!(settings.timeout, Duration::from_millis(1500));
    assert_eq!(settings.reset_settle, Duration::from_millis(10));
    assert_eq!(config.usb.vendor_id, 0xcafe);
}
