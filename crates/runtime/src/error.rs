//! Runtime errors.
//!
//! Config and build errors are fatal at startup and carry line/column
//! diagnostics; nothing past startup aborts the process.

use thiserror::Error;

use sysguard_formula::CompileError;

/// Config-file syntax error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}, column {col}: {message}")]
    Syntax {
        line: usize,
        col: usize,
        message: String,
    },
}

/// Engine construction error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("line {line}: var '{name}': {source}")]
    Formula {
        name: String,
        line: usize,
        #[source]
        source: CompileError,
    },

    #[error("line {line}: duplicate var '{name}'")]
    DuplicateVar { name: String, line: usize },

    #[error("line {line}: duplicate daemon '{name}'")]
    DuplicateDaemon { name: String, line: usize },
}
