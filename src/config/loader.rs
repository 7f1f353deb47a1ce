use crate::config::schema::{Config, ValidationError};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up by [`discover`].
pub const CONFIG_FILE: &str = "codecells.toml";

/// Where a configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Text passed to [`load_from_str`].
    Inline,
    /// A file named by the caller.
    File(PathBuf),
    /// A file [`discover`] found walking up from `start`.
    Discovered { path: PathBuf, start: PathBuf },
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Inline => f.write_str("inline config"),
            ConfigOrigin::File(path) => write!(f, "config {}", path.display()),
            ConfigOrigin::Discovered { path, start } => write!(
                f,
                "config {} (nearest to {})",
                path.display(),
                start.display()
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {origin}: {source}")]
    Io {
        origin: ConfigOrigin,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Toml {
        origin: ConfigOrigin,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid {origin}:\n{source}")]
    Validation {
        origin: ConfigOrigin,
        #[source]
        source: ValidationError,
    },
}

impl ConfigError {
    pub fn origin(&self) -> &ConfigOrigin {
        match self {
            ConfigError::Io { origin, .. }
            | ConfigError::Toml { origin, .. }
            | ConfigError::Validation { origin, .. } => origin,
        }
    }

    fn with_origin(self, origin: ConfigOrigin) -> Self {
        match self {
            ConfigError::Io { source, .. } => ConfigError::Io { origin, source },
            ConfigError::Toml { source, .. } => ConfigError::Toml { origin, source },
            ConfigError::Validation { source, .. } => ConfigError::Validation { origin, source },
        }
    }
}

pub fn load_from_str(input: &str) -> Result<Config, ConfigError> {
    let config: Config = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        origin: ConfigOrigin::Inline,
        source,
    })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation {
            origin: ConfigOrigin::Inline,
            source,
        })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let origin = ConfigOrigin::File(path.to_path_buf());
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        origin: origin.clone(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_origin(origin))
}

/// Load the nearest `codecells.toml` in `start` or its ancestors.
///
/// Returns the defaults (and `None` for the path) when there is none.
pub fn discover(start: &Path) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let Some(candidate) = start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
    else {
        return Ok((Config::default(), None));
    };

    tracing::debug!(path = %candidate.display(), "using config");
    let config = load_from_path(&candidate).map_err(|error| {
        error.with_origin(ConfigOrigin::Discovered {
            path: candidate.clone(),
            start: start.to_path_buf(),
        })
    })?;
    Ok((config, Some(candidate)))
}
