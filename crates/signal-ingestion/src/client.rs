// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Semantic operations on top of the transport: report a signal, a trace or a
//! batch of signals.

use crate::auth::{self, CredentialSource, Credentials};
use crate::config::ClientConfig;
use crate::errors::{self, Ingestion};
use crate::serializer::Payload;
use crate::signals::{Signal, Trace};
use crate::transport::{Request, Transport};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::fmt;
use std::sync::Arc;

pub const SIGNALS_PATH: &str = "signals";
pub const TRACES_PATH: &str = "traces";
pub const BATCHES_PATH: &str = "batches";

/// Client that expects the authentication headers on every call.
#[derive(Clone)]
pub struct IngestionClient {
    transport: Arc<Transport>,
    compression: bool,
}

impl IngestionClient {
    pub fn new(config: &ClientConfig) -> Result<Self, errors::Config> {
        Ok(Self {
            transport: Arc::new(Transport::new(config)?),
            compression: config.compression,
        })
    }

    #[must_use]
    pub fn from_transport(transport: Arc<Transport>, compression: bool) -> Self {
        Self {
            transport,
            compression,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub async fn report_signal(&self, signal: &Signal, headers: &HeaderMap) -> Result<(), Ingestion> {
        self.post(SIGNALS_PATH, Payload::Signal(signal), headers).await
    }

    pub async fn report_trace(&self, trace: &Trace, headers: &HeaderMap) -> Result<(), Ingestion> {
        self.post(TRACES_PATH, Payload::Trace(trace), headers).await
    }

    pub async fn report_batch(&self, batch: &[Signal], headers: &HeaderMap) -> Result<(), Ingestion> {
        self.post(BATCHES_PATH, Payload::Batch(batch), headers).await
    }

    /// Resolves `source` and binds the resulting headers to a new client.
    pub async fn with_authentication(
        self,
        source: &CredentialSource,
    ) -> Result<AuthenticatedClient, errors::Config> {
        let credentials = source.resolve().await?;
        AuthenticatedClient::new(self, credentials)
    }

    pub fn close(&self) {
        self.transport.close();
    }

    async fn post(&self, path: &str, payload: Payload<'_>, headers: &HeaderMap) -> Result<(), Ingestion> {
        let request = Request::post(path)
            .headers(headers)
            .payload(payload)
            .compression(self.compression);
        self.transport.execute(request).await
    }
}

impl fmt::Debug for IngestionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionClient")
            .field("transport", &self.transport)
            .field("compression", &self.compression)
            .finish()
    }
}

/// Client that attaches the headers derived from its credentials to every
/// request.
#[derive(Clone)]
pub struct AuthenticatedClient {
    client: IngestionClient,
    headers: HeaderMap,
}

impl AuthenticatedClient {
    pub fn new(client: IngestionClient, credentials: &Credentials) -> Result<Self, errors::Config> {
        Ok(Self {
            client,
            headers: auth::auth_headers(credentials)?,
        })
    }

    #[must_use]
    pub fn auth_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub async fn report_signal(&self, signal: &Signal) -> Result<(), Ingestion> {
        self.client.report_signal(signal, &self.headers).await
    }

    pub async fn report_trace(&self, trace: &Trace) -> Result<(), Ingestion> {
        self.client.report_trace(trace, &self.headers).await
    }

    pub async fn report_batch(&self, batch: &[Signal]) -> Result<(), Ingestion> {
        self.client.report_batch(batch, &self.headers).await
    }

    pub fn close(&self) {
        self.client.close();
    }
}

impl fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // header values are marked sensitive, so only names are printed
        f.debug_struct("AuthenticatedClient")
            .field("client", &self.client)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Destination of the batches drained by a collector.
#[async_trait]
pub trait BatchReporter: Send + Sync {
    async fn report_batch(&self, batch: &[Signal]) -> Result<(), Ingestion>;
}

#[async_trait]
impl BatchReporter for AuthenticatedClient {
    async fn report_batch(&self, batch: &[Signal]) -> Result<(), Ingestion> {
        AuthenticatedClient::report_batch(self, batch).await
    }
}
