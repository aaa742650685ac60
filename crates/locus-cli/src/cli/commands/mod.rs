use std::path::{Path, PathBuf};

use anyhow::Context;
use locus_resolver::JsonFileStore;

use super::args::*;

pub mod cache;
mod dispatch;
pub mod resolve;
pub mod settings;

pub use dispatch::dispatch;

/// Cache file store from `--cache-file`, else the default location.
pub(crate) fn open_store(backend: &BackendArgs) -> anyhow::Result<JsonFileStore> {
    match &backend.cache_file {
        Some(path) => Ok(JsonFileStore::new(path)),
        None => Ok(JsonFileStore::in_default_dir()?),
    }
}

/// Settings file from the flag, else `<config dir>/locus/settings.json`.
pub(crate) fn settings_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .context("could not determine config directory")?;
    Ok(base.join("locus").join("settings.json"))
}
