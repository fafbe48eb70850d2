// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hooks notified about the outcome of every request to the backend.

use crate::errors::Ingestion;
use tracing::warn;

pub trait ErrorListener: Send + Sync {
    /// Called once for each failed request, before the error is returned.
    fn on_error(&self, path: &str, error: &Ingestion);

    fn on_success(&self, _path: &str) {}
}

/// Ignores every outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorListener;

impl ErrorListener for NoopErrorListener {
    fn on_error(&self, _path: &str, _error: &Ingestion) {}
}

/// Logs failures at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorListener;

impl ErrorListener for LoggingErrorListener {
    fn on_error(&self, path: &str, error: &Ingestion) {
        warn!("Error on {path}: {error}");
    }
}
