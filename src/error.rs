//! Error type definitions for the watchdog and manager binaries.
//!
//! Mirrors the kinds enumerated in the design: each external boundary
//! (HTTP, YAML, service control, subprocess) gets its own `#[from]`
//! conversion so call sites can propagate with `?`.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("control-plane error: {0}")]
    Api(#[from] ApiError),

    #[error("service control error: {0}")]
    ServiceControl(#[from] ServiceControlError),

    #[error("integrity mismatch: expected md5 {expected}, got {actual} for {path}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("license invalid for owner check at {endpoint}")]
    LicenseInvalid { endpoint: String },

    #[error("subprocess failed: {command} - {message}")]
    SubprocessFailed { command: String, message: String },

    #[error("unknown command received: {kind}")]
    UnknownCommand { kind: String },

    #[error("shutdown in progress, task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn subprocess<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        Self::SubprocessFailed {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Config Store specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at {path}")]
    NotFound { path: String },

    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// API Client specific errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned status {status}: {body}")]
    RemoteStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("local io error while handling {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Service-Control Adapter specific errors.
#[derive(Error, Debug)]
pub enum ServiceControlError {
    #[error("service '{name}' not found")]
    NotFound { name: String },

    #[error("service '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("failed to reach state {expected} for service '{name}' within {timeout_secs}s")]
    TransitionTimeout {
        name: String,
        expected: String,
        timeout_secs: u64,
    },

    #[error("platform service-control call failed for '{name}': {message}")]
    PlatformFailure { name: String, message: String },
}

pub type AppResult<T> = Result<T, AppError>;
