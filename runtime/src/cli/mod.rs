//! CLI subcommand implementations for the `landcomp` binary.

pub mod aggregate_cmd;
pub mod doctor;
pub mod plan_cmd;
pub mod run_cmd;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;

use crate::config::{resolve_config_path, Config, DataPaths};

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn config_path(&self) -> PathBuf {
        resolve_config_path(self.config.as_deref())
    }

    /// Load the config and resolve the data directory.
    pub fn load(&self) -> Result<(Config, DataPaths)> {
        let config = Config::load(self.config.as_deref())?;
        let paths = config.data_paths(self.data_dir.as_deref());
        Ok((config, paths))
    }
}
