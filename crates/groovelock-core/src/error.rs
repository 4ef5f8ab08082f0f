//! Error types for groovelock-core.
//!
//! Only the outer surfaces (configuration files, port connections, JSON
//! export) produce errors. The real-time path clamps instead of failing.

use thiserror::Error;

/// Result type alias for groovelock-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at the boundaries of groovelock-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sending a fully formed message to the output port failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// MIDI port discovery or connection error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
