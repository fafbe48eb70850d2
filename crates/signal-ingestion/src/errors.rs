// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types and the mapping from backend responses to them.

use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Status codes the backend uses to reject credentials.
pub const BAD_AUTH_STATUS_CODES: [u16; 2] = [401, 403];

/// Status code the backend uses to reject a malformed payload.
pub const INVALID_PAYLOAD_STATUS_CODE: u16 = 422;

/// Errors raised while building clients and collectors.
#[derive(Debug, thiserror::Error)]
pub enum Config {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Invalid proxy specification: {0}")]
    InvalidProxy(String),

    #[error("Invalid ingestion url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to resolve credentials: {0}")]
    CredentialResolution(String),

    #[error("Credential for header {0} is not a valid header value")]
    InvalidHeader(&'static str),

    #[error("No tokio runtime available to run batch submissions")]
    NoRuntime,

    #[error("Failed to build http client: {0}")]
    HttpClient(String),
}

/// Outcome of a failed call to the ingestion backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ingestion {
    /// The backend rejected the credentials (401 or 403).
    #[error("{message}")]
    Authentication { status: u16, message: String },

    /// The backend rejected the payload (422).
    #[error("{message}")]
    InvalidPayload { message: String },

    /// Any other status besides 200 and 202.
    #[error("{message}")]
    BadStatus { status: u16, message: String },

    /// The request did not produce a response: connection refused, timeout,
    /// or a client that has already been shut down.
    #[error("Connectivity failure: {0}")]
    Transport(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(String),
}

impl Ingestion {
    /// HTTP status carried by the error, if the backend answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::BadStatus { status, .. } => Some(*status),
            Self::InvalidPayload { .. } => Some(INVALID_PAYLOAD_STATUS_CODE),
            Self::Transport(_) | Self::Serialization(_) => None,
        }
    }
}

impl From<reqwest::Error> for Ingestion {
    fn from(err: reqwest::Error) -> Self {
        let cause = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::Transport(format!("{cause}: {err}"))
    }
}

impl From<serde_json::Error> for Ingestion {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors surfaced by the batch collector.
#[derive(Debug, thiserror::Error)]
pub enum Collector {
    #[error("close() has already been called")]
    Closed,

    #[error(transparent)]
    Ingestion(#[from] Ingestion),
}

/// Structured error document the backend may attach to a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendErrorBody {
    pub message: String,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl fmt::Display for BackendErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.errors {
            Some(errors) => write!(f, "{} ({errors})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Classifies a response whose status is neither 200 nor 202.
///
/// Parsing the body is best effort: a body that is not a [`BackendErrorBody`]
/// only leaves the raw status and text in the message.
#[must_use]
pub fn classify(status: u16, body: &str) -> Ingestion {
    let raw_message = format!("Unexpected response code: {status}. Body {body}");
    let message = match parse_error_body(body) {
        Some(parsed) => format!("Backend sent status {status}: {parsed}"),
        None => raw_message.clone(),
    };

    if BAD_AUTH_STATUS_CODES.contains(&status) {
        Ingestion::Authentication { status, message }
    } else if status == INVALID_PAYLOAD_STATUS_CODE {
        Ingestion::InvalidPayload { message }
    } else {
        Ingestion::BadStatus {
            status,
            message: raw_message,
        }
    }
}

fn parse_error_body(body: &str) -> Option<BackendErrorBody> {
    match serde_json::from_str(body) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Error reading error response: {e}");
            None
        }
    }
}
