// error.rs — Error types for the change set subsystem.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::element::Capability;

/// Errors raised while parsing a [`Locator`](crate::Locator).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// The input was empty (or only whitespace).
    #[error("locator is empty")]
    Empty,

    /// The scheme portion is not `[a-z][a-z0-9+.-]*`.
    #[error("invalid locator scheme: {0:?}")]
    InvalidScheme(String),
}

/// Errors from an element's optional behaviors.
#[derive(Debug, Error)]
pub enum ElementError {
    /// The element does not offer this capability.
    #[error("element does not support {0}")]
    Unsupported(Capability),

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Any other element-defined failure.
    #[error("element operation failed: {0}")]
    Failed(String),
}

/// Errors that can occur during change set operations.
#[derive(Debug, Error)]
pub enum ChangeSetError {
    /// A mutating call was made after `dispose()`.
    #[error("change set {id} has been disposed")]
    Disposed { id: Uuid },

    /// A removal index did not refer to a held element.
    #[error("index {index} out of range for change set of {len} element(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Element(#[from] ElementError),
}

/// Errors while loading [`ChangeSetConfig`](crate::ChangeSetConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
