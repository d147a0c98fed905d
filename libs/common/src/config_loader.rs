//! Layered configuration loading
//!
//! Sources, lowest to highest priority:
//! 1. Compiled-in defaults (the `Default` value of the config type)
//! 2. Optional configuration file (yaml, toml or json, chosen by extension)
//! 3. Prefixed environment variables; `__` separates nested keys
//!
//! Command-line overrides are applied by the caller on the extracted value.

use errors::{IedError, IedResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Load a configuration from defaults, an optional file and the environment
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_layered(&ServerConfig::default(), args.config.as_deref(), "IEDSRV_")?;
/// ```
pub fn load_layered<T>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> IedResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        info!("Loading configuration from: {}", path.display());
        figment = merge_file(figment, path)?;
    } else {
        debug!("No configuration file given, using defaults");
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| IedError::Configuration(format!("Failed to load configuration: {}", e)))
}

fn merge_file(figment: Figment, path: &Path) -> IedResult<Figment> {
    if !path.exists() {
        return Err(IedError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IedError::config("Config file must have an extension"))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(IedError::Configuration(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}
