//! Run configuration for ledger-ingest
//!
//! Built once per process from the TOML config and command-line flags, then
//! handed to the matcher and pipeline constructors.

use crate::reconcile::commitment::FuzzyOptions;
use crate::services::persistence_pipeline::PipelineConfig;
use crate::vocabulary::MatchingResources;
use ledger_common::config::{resolve_root_folder, ResourcePaths, TomlConfig};
use std::path::PathBuf;
use tracing::info;

/// Command-line values that take priority over the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    /// `--fuzzy` only turns the tier on; the file can enable it too
    pub fuzzy: bool,
}

/// Resolved settings of one ingest run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    /// Resource file locations, already resolved against the root folder
    pub resources: ResourcePaths,
    pub chunk_size: usize,
    pub fuzzy: FuzzyOptions,
    pub fast_insert: bool,
}

impl IngestConfig {
    pub fn resolve(toml: &TomlConfig, cli: &CliOverrides) -> Self {
        let root_folder = resolve_root_folder(cli.root_folder.as_deref(), toml);
        let database_path = match &cli.database {
            Some(path) => path.clone(),
            None => toml.database_path(&root_folder),
        };

        let config = Self {
            resources: toml.resources.resolved_against(&root_folder),
            chunk_size: cli.chunk_size.unwrap_or(toml.ingest.chunk_size),
            fuzzy: FuzzyOptions {
                enabled: cli.fuzzy || toml.ingest.fuzzy_enabled,
                cutoff: toml.ingest.fuzzy_cutoff,
            },
            fast_insert: toml.ingest.fast_insert,
            root_folder,
            database_path,
        };

        info!(
            root_folder = %config.root_folder.display(),
            database = %config.database_path.display(),
            chunk_size = config.chunk_size,
            fuzzy = config.fuzzy.enabled,
            "Configuration resolved"
        );
        config
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunk_size: self.chunk_size,
            fast_insert: self.fast_insert,
        }
    }

    pub fn load_resources(&self) -> MatchingResources {
        MatchingResources::load(&self.resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::config::{DEFAULT_CHUNK_SIZE, ROOT_FOLDER_ENV};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_follow_the_root_folder() {
        std::env::remove_var(ROOT_FOLDER_ENV);
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/srv/ledger")),
            ..Default::default()
        };

        let config = IngestConfig::resolve(&toml, &CliOverrides::default());

        assert_eq!(config.root_folder, PathBuf::from("/srv/ledger"));
        assert_eq!(config.database_path, PathBuf::from("/srv/ledger/ledger.db"));
        assert_eq!(
            config.resources.vocabulary,
            PathBuf::from("/srv/ledger/resources/planning_keys.json")
        );
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.fuzzy.enabled);
        assert!(config.fast_insert);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file() {
        std::env::remove_var(ROOT_FOLDER_ENV);
        let toml = TomlConfig::from_toml_str(
            r#"
            root_folder = "/srv/ledger"

            [ingest]
            chunk_size = 250
            fuzzy_cutoff = 85.0
            fast_insert = false
            "#,
        )
        .unwrap();
        let cli = CliOverrides {
            root_folder: Some(PathBuf::from("/tmp/run")),
            database: Some(PathBuf::from("/tmp/other.db")),
            chunk_size: Some(10),
            fuzzy: true,
        };

        let config = IngestConfig::resolve(&toml, &cli);

        assert_eq!(config.root_folder, PathBuf::from("/tmp/run"));
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.chunk_size, 10);
        assert!(config.fuzzy.enabled);
        assert_eq!(config.fuzzy.cutoff, 85.0);
        assert_eq!(
            config.pipeline_config(),
            PipelineConfig {
                chunk_size: 10,
                fast_insert: false
            }
        );
    }
}
