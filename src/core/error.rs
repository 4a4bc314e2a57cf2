//! Error types for the loader core.
//!
//! Only identifier resolution surfaces a hard error; fetch and compile
//! failures degrade to sentinel values threaded through the module graph.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while turning a module identifier into a canonical locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The identifier was empty.
    #[error("empty module identifier")]
    EmptyIdentifier,

    /// More `..` segments than preceding path segments.
    #[error("identifier ascends past the root: `{0}`")]
    AscentPastRoot(String),
}

/// Failure while loading a configuration file (CLI only).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },

    #[error("invalid map pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: Box<regex::Error>,
    },
}
