//! Error types for the mutating webhook

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the webhook
pub type Result<T> = std::result::Result<T, Error>;

/// Webhook errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate or key could not be loaded, parsed, or paired
    #[error("Credential load error: {0}")]
    CredentialLoad(String),

    /// Admission review body could not be decoded
    #[error("Could not decode request: {0}")]
    Decode(String),

    /// Embedded object in the admission request is malformed
    #[error("Failed to unmarshal object: {0}")]
    ObjectParse(String),

    /// File watch subsystem failure
    #[error("Watch error: {0}")]
    Watch(String),

    /// Config snapshot directory could not be read
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the error maps to when it ends a request
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::ObjectParse(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for the `error_type` dimension of the error counter
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::Json(_) => "decode_error",
            Self::ObjectParse(_) => "unmarshal_error",
            Self::CredentialLoad(_) => "credential_reload_error",
            Self::Snapshot(_) => "config_reload_error",
            Self::Watch(_) => "watch_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
