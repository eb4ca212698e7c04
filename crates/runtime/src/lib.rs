//! sysguard runtime
//!
//! Owns the configured vars, re-evaluates them every tick, batches
//! change notification behind dirty flags, and glues daemon-sourced
//! values into formula evaluation.

pub mod config;
pub mod engine;
pub mod error;
pub mod providers;
pub mod store;
pub mod vars;

pub use config::Config;
pub use engine::Engine;
pub use error::{ConfigError, EngineError};
pub use vars::{VarId, VarRegistry};
