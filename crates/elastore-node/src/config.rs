//! Layered node configuration
//!
//! Later layers win: built-in defaults, then an optional TOML/YAML/JSON
//! file, then `ELASTORE_*` environment variables, then command-line flags.

use anyhow::Context;
use elastore_core::Config;
use std::path::{Path, PathBuf};

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "ELASTORE";

/// Load defaults, `path` and the process environment
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    load_config_with_env(path, None)
}

/// Like [`load_config`], reading variables from `env` instead of the
/// process environment when given
pub fn load_config_with_env(
    path: Option<&Path>,
    env: Option<config::Map<String, String>>,
) -> anyhow::Result<Config> {
    let defaults =
        config::Config::try_from(&Config::default()).context("serializing default configuration")?;
    let mut builder = config::Config::builder().add_source(defaults);
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(env),
    );

    let layered = builder.build().context("loading configuration")?;
    let config: Config = layered
        .try_deserialize()
        .context("parsing configuration")?;
    Ok(config)
}

/// Command-line overrides; `None` keeps the value from lower layers
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub metadata_service_address: Option<String>,
    pub listen_address: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub port_http_server: Option<u16>,
    pub local_storage_path: Option<PathBuf>,
    pub cache_block_size: Option<usize>,
    pub available_local_storage: Option<u64>,
    pub available_local_memory: Option<u64>,
    pub cache_objects_from_s3: bool,
    pub force_relocation_when_stopping: bool,
    pub pub_sub_enabled: bool,
}

impl ConfigOverrides {
    /// Apply the overrides on top of `config`. Boolean flags can only
    /// switch a feature on.
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(address) = self.metadata_service_address {
            config.metadata_service_address = address;
        }
        if let Some(address) = self.listen_address {
            config.listen_address = address;
        }
        if let Some(hostname) = self.hostname {
            config = config.with_hostname(hostname);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.port_http_server {
            config.port_http_server = port;
        }
        if let Some(path) = self.local_storage_path {
            config.local_storage_path = path;
        }
        if let Some(size) = self.cache_block_size {
            config.cache_block_size = size;
        }
        if let Some(bytes) = self.available_local_storage {
            config.available_local_storage = bytes;
        }
        if let Some(bytes) = self.available_local_memory {
            config.available_local_memory = bytes;
        }
        config.cache_objects_from_s3 |= self.cache_objects_from_s3;
        config.force_relocation_when_stopping |= self.force_relocation_when_stopping;
        config.pub_sub_enabled |= self.pub_sub_enabled;
        config
    }
}
