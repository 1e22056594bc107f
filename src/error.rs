use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::channel::ChannelUriError;
use crate::driver::buffer::RawLogError;
use crate::driver::command::CommandError;
use crate::driver::conductor::ConductorError;

/// Config file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] ChannelUriError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Conductor(#[from] ConductorError),

    #[error(transparent)]
    RawLog(#[from] RawLogError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
