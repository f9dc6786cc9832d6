use std::fs;

use infinity_metrics_installer::{Config, DeployError, InstallLock};
use tempfile::TempDir;

#[test]
fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("im").join(".env");
    let config = Config::new()
        .domain("stats.example.com")
        .admin_email("ops@example.com")
        .license_key("IM-1")
        .install_dir(dir.path().join("im"));

    config.save_to_file(&path).unwrap();
    let loaded = Config::load_from_file(&path).unwrap();

    assert_eq!(loaded, config);
    assert_eq!(loaded.env_file_path(), path);
}

#[cfg(unix)]
#[test]
fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".env");
    Config::new().save_to_file(&path).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn missing_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_file(&dir.path().join(".env")).unwrap_err();
    assert!(matches!(err, DeployError::FileNotFound(_)));
}

#[cfg(unix)]
#[test]
fn concurrent_runs_are_refused() {
    let dir = TempDir::new().unwrap();
    let config = Config::new().install_dir(dir.path());

    let held = InstallLock::acquire(&config.lock_path()).unwrap();
    let err = InstallLock::acquire(&config.lock_path()).unwrap_err();
    assert!(matches!(err, DeployError::LockHeld(_)));

    drop(held);
    assert!(InstallLock::acquire(&config.lock_path()).is_ok());
}
