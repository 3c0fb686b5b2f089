//! Error types for the failover controller

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors. Fatal at startup, never raised by the control loops.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required config field: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid {field} pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Environment override {var}={value:?} could not be parsed")]
    EnvOverride { var: String, value: String },
}

/// Errors talking to the proxy control service
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid control API URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Control API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from control API: {0}")]
    Decode(String),
}

/// Snapshot refresh errors. The previous generation is kept on any of these.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("No endpoints left after filtering")]
    NoEndpoints,
}

/// Endpoint selection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("Endpoint pool is empty")]
    NoEndpoints,

    #[error("No suitable endpoint within {ceiling_ms}ms")]
    NoSuitableEndpoint { ceiling_ms: u32 },
}
