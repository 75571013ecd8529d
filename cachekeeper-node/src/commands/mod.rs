//! # CLI Commands
//!
//! Command implementations for the cachekeeper CLI.

pub mod config;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use cachekeeper_core::config::{ConfigFileLoader, ConfigFormat, ConfigSet, FormattedFileLoader};

/// Read a config file, guessing the format from its extension unless one is given
pub async fn load_config_file(path: &Path, format: Option<ConfigFormat>) -> Result<ConfigSet> {
    let loader = match format {
        Some(format) => FormattedFileLoader::with_format(format),
        None => FormattedFileLoader::new(),
    };
    loader
        .load(path)
        .await
        .with_context(|| format!("Failed to load config file {}", path.display()))
}
