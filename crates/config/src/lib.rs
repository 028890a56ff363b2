// Configuration loading

pub mod dotenv;
pub mod file;
pub mod settings;

pub use file::FileConfig;
pub use settings::{
    KnowlarityCredentials, KnowlaritySettings, MetaCredentials, MetaSettings, Settings,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required credentials absent from every layer.
    #[error("missing configuration for {pipeline}: {}", .vars.join(", "))]
    Missing {
        pipeline: &'static str,
        vars: Vec<&'static str>,
    },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
