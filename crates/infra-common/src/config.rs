//! Typed configuration loading
//!
//! Configuration is TOML. Every section type is expected to implement
//! `Default` with `#[serde(default)]`, so a missing file section or an empty
//! file yields the defaults.

use crate::errors::types::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, info};

/// Parse a configuration document from a string
pub fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    toml::from_str(text).map_err(|e| Error::config(e.to_string()))
}

/// Load a configuration file
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).map_err(|e| Error::io(path.display().to_string(), e))?;
    debug!("Read {} bytes of configuration from {}", text.len(), path.display());
    let parsed = from_toml_str(&text)?;
    info!("Loaded configuration from {}", path.display());
    Ok(parsed)
}

/// Load a configuration file when a path is given, defaults otherwise
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_toml(path),
        None => Ok(T::default()),
    }
}
