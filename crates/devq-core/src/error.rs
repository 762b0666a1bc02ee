//! Error types for core parsing and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A trash sidecar line did not have the `name|path|date` shape.
    #[error("Malformed trash entry: {line}")]
    MalformedTrashEntry { line: String },

    /// Configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration values are invalid.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl CoreError {
    /// Create a malformed trash entry error.
    pub fn malformed_entry(line: impl Into<String>) -> Self {
        Self::MalformedTrashEntry { line: line.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_entry_message() {
        let err = CoreError::malformed_entry("garbage");
        assert_eq!(err.to_string(), "Malformed trash entry: garbage");
    }
}
