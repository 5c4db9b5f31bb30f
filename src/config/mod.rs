//! Config loading and persistence.

mod load;
mod merge;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{config_path, load, load_layer, load_or_default, load_user_config, write_config};
pub use merge::{apply_env_overrides, merge_layers};
pub use schema::{
    Config, ConfigLayer, CredentialsConfig, CredentialsConfigOverride, FileLoggingConfig,
    FileLoggingConfigOverride, IdentityConfig, IdentityConfigOverride, LfsConfig,
    LfsConfigOverride, LogFormat, LogRotation, LoggingConfig, LoggingConfigOverride,
    NetworkConfig, NetworkConfigOverride, RepositoryConfig, RepositoryConfigOverride,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[source] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required config value `{field}`")]
    Missing { field: &'static str },
}
