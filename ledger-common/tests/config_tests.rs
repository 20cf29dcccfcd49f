//! Configuration resolution and graceful degradation
//!
//! Uses serial_test: tests touching LEDGER_ROOT_FOLDER or LEDGER_CONFIG run
//! one at a time.

use ledger_common::config::{
    default_root_folder, resolve_root_folder, TomlConfig, CONFIG_FILE_ENV, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/ledger-env-root");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ledger-toml-root")),
        ..Default::default()
    };

    let root = resolve_root_folder(Some(Path::new("/tmp/ledger-cli-root")), &config);
    assert_eq!(root, PathBuf::from("/tmp/ledger-cli-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/ledger-env-root");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ledger-toml-root")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, &config);
    assert_eq!(root, PathBuf::from("/tmp/ledger-env-root"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/ledger-toml-root")),
        ..Default::default()
    };

    assert_eq!(
        resolve_root_folder(None, &config),
        PathBuf::from("/tmp/ledger-toml-root")
    );
}

#[test]
#[serial]
fn test_default_when_nothing_configured() {
    env::remove_var(ROOT_FOLDER_ENV);
    let root = resolve_root_folder(None, &TomlConfig::default());
    assert_eq!(root, default_root_folder());
    assert!(!root.as_os_str().is_empty());
}

#[test]
#[serial]
fn test_load_or_default_reads_explicit_file() {
    env::remove_var(CONFIG_FILE_ENV);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/data/ledger"

[ingest]
chunk_size = 500
fuzzy_enabled = true
fuzzy_cutoff = 92.5

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(&path));
    assert_eq!(config.root_folder, Some(PathBuf::from("/data/ledger")));
    assert_eq!(config.ingest.chunk_size, 500);
    assert!(config.ingest.fuzzy_enabled);
    assert_eq!(config.ingest.fuzzy_cutoff, 92.5);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_load_or_default_survives_missing_file() {
    env::remove_var(CONFIG_FILE_ENV);
    let dir = TempDir::new().unwrap();
    let config = TomlConfig::load_or_default(Some(&dir.path().join("absent.toml")));
    assert!(config.root_folder.is_none());
    assert_eq!(config.ingest.chunk_size, 1000);
}

#[test]
#[serial]
fn test_load_or_default_survives_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[ingest\nchunk_size = ").unwrap();
    env::set_var(CONFIG_FILE_ENV, &path);

    let config = TomlConfig::load_or_default(None);
    assert_eq!(config.ingest.chunk_size, 1000);
    assert!(!config.ingest.fuzzy_enabled);

    env::remove_var(CONFIG_FILE_ENV);
}
