//! Library error types.
//!
//! Script failures are never errors: handlers report them as an
//! [`ExecutionResult`](crate::ExecutionResult). These enums cover the
//! plumbing around dispatch.

use crate::runtime::EngineKind;
use std::io;
use std::path::PathBuf;

/// Loading `scriptrun.toml` failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Malformed direct-binary address (`module-path::TypeName`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("binary address is empty")]
    Empty,

    #[error("binary address `{0}` has no module path")]
    MissingModule(String),

    #[error("binary address `{0}` has an empty type name")]
    EmptyTypeName(String),
}

/// Dispatcher construction and name parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Every engine kind needs a handler before the dispatcher is usable.
    #[error("no handler registered for engine `{0}`")]
    MissingHandler(EngineKind),

    #[error("unknown engine `{0}`")]
    UnknownEngine(String),

    #[error("unknown interface `{0}`")]
    UnknownInterface(String),
}
