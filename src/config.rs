//! User configuration (`config.toml` in the gridplate config dir).
//!
//! ```toml
//! backend = "markdown"
//! functions = ["~/reports/helpers.rhai"]
//! strict = true
//! fixed_point = 2
//! ```

use directories::ProjectDirs;
use gridplate_core::GridplateError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Backend used when neither `--backend` nor `GRIDPLATE_BACKEND` is set.
    pub backend: Option<String>,
    /// Function files loaded before any given with `-f`.
    #[serde(default)]
    pub functions: Vec<PathBuf>,
    #[serde(default)]
    pub strict: bool,
    /// Decimal places for exact group sums; f64 sums when unset.
    pub fixed_point: Option<u32>,
}

pub(crate) fn config_dir() -> Option<PathBuf> {
    let proj = ProjectDirs::from("me", "shoryuken", "gridplate")?;
    Some(proj.config_dir().to_path_buf())
}

fn user_config_path() -> Option<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Some(path)
}

/// Load `explicit`, or the user config file when it exists.
///
/// An explicit path must exist; a missing user config is an empty config.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, GridplateError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match user_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(Config::default()),
        },
    };

    let meta = std::fs::metadata(&path)
        .map_err(|e| GridplateError::Config(format!("{}: {}", path.display(), e)))?;
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        return Err(GridplateError::Config(format!(
            "refusing to read {}: file too large ({} bytes, max {})",
            path.display(),
            meta.len(),
            MAX_CONFIG_FILE_BYTES
        )));
    }
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)
        .map_err(|e| GridplateError::Config(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}
