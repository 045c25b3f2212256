//! Errors raised while loading, validating or saving configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    CreateDir,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
            Self::CreateDir => f.write_str("create directory"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot {op} '{}': {source}", .path.display())]
    Io {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid TOML or has fields of the wrong type
    #[error("invalid config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The layers parsed individually but not once merged
    #[error("merged configuration is invalid: {0}")]
    Merge(#[source] toml::de::Error),

    #[error("cannot encode configuration as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn io(op: FileOp, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, source: toml::de::Error) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_operation_and_path() {
        let err = ConfigError::io(
            FileOp::CreateDir,
            Path::new("/srv/app/.lazyorm"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.starts_with("cannot create directory '/srv/app/.lazyorm'"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_value_display() {
        let err = ConfigError::invalid("session.id_block_size", "must be at least 1");
        assert_eq!(err.to_string(), "session.id_block_size: must be at least 1");
    }
}
