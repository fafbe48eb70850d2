// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP exchange with the ingestion backend.
//!
//! A [`Transport`] knows nothing about batching or credentials: callers hand it
//! a [`Request`] carrying a path, headers and an optional payload, and get back
//! either success or a classified [`Ingestion`] error.

use crate::config::ClientConfig;
use crate::errors::{self, Ingestion};
use crate::listener::{ErrorListener, NoopErrorListener};
use crate::serializer::{JsonSerializer, Payload, PayloadSerializer};
use flate2::{write::GzEncoder, Compression};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_REDIRECTS: usize = 2;
pub const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 40;

const POOL_SHUTDOWN_MESSAGE: &str = "Request failed due to http client pool shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A request to be executed against the backend.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    method: HttpMethod,
    path: &'a str,
    headers: HeaderMap,
    payload: Option<Payload<'a>>,
    compression: bool,
}

impl<'a> Request<'a> {
    #[must_use]
    pub fn post(path: &'a str) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    #[must_use]
    pub fn get(path: &'a str) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    fn new(method: HttpMethod, path: &'a str) -> Self {
        Self {
            method,
            path,
            headers: HeaderMap::new(),
            payload: None,
            compression: false,
        }
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds every value of `headers`, keeping repeated values.
    #[must_use]
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Sets the body. Ignored on GET requests.
    #[must_use]
    pub fn payload(mut self, payload: Payload<'a>) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.path
    }
}

pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    serializer: Arc<dyn PayloadSerializer>,
    error_listener: Arc<dyn ErrorListener>,
    closed: AtomicBool,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, errors::Config> {
        config.validate()?;
        let client = build_http_client(config)?;
        Ok(Self::with_client(client, &config.base_url))
    }

    /// Wraps an already configured reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            serializer: Arc::new(JsonSerializer),
            error_listener: Arc::new(NoopErrorListener),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn PayloadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn with_error_listener(mut self, error_listener: Arc<dyn ErrorListener>) -> Self {
        self.error_listener = error_listener;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins the base URL and `path` with exactly one slash.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Executes `request`, discarding the response body on success.
    pub async fn execute(&self, request: Request<'_>) -> Result<(), Ingestion> {
        let result = self.dispatch(&request).await.map(|_| ());
        self.report(&request, result)
    }

    /// Executes `request` and deserializes the response body.
    pub async fn execute_json<R: DeserializeOwned>(
        &self,
        request: Request<'_>,
    ) -> Result<R, Ingestion> {
        let result = match self.dispatch(&request).await {
            Ok(response) => response.json::<R>().await.map_err(|e| {
                Ingestion::Serialization(format!("failed to decode response body: {e}"))
            }),
            Err(e) => Err(e),
        };
        self.report(&request, result)
    }

    /// Rejects every subsequent request. Requests already in flight complete.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn dispatch(&self, request: &Request<'_>) -> Result<reqwest::Response, Ingestion> {
        if self.is_closed() {
            return Err(Ingestion::Transport(POOL_SHUTDOWN_MESSAGE.to_string()));
        }

        let url = self.url(request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => {
                let mut body = match &request.payload {
                    Some(payload) => self.serializer.serialize(payload)?,
                    None => Vec::new(),
                };
                let mut builder = self
                    .client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json");
                if request.compression {
                    body = gzip(&body)
                        .map_err(|e| Ingestion::Serialization(format!("gzip failed: {e}")))?;
                    builder = builder.header(CONTENT_ENCODING, "gzip");
                }
                builder.body(body)
            }
        };
        builder = builder.headers(request.headers.clone());

        debug!("Sending {} request to {url}", request.method);
        let response = builder.send().await?;
        let status = response.status().as_u16();
        if status == 200 || status == 202 {
            return Ok(response);
        }

        // a body that cannot be read is a connectivity failure, not a status error
        let body = response.text().await?;
        Err(errors::classify(status, &body))
    }

    fn report<T>(&self, request: &Request<'_>, result: Result<T, Ingestion>) -> Result<T, Ingestion> {
        match &result {
            Ok(_) => self.error_listener.on_success(request.path),
            Err(e) => {
                warn!(
                    "Error in communication with ingestion backend ({} on {}): {e}",
                    request.method, self.base_url
                );
                self.error_listener.on_error(request.path, e);
            }
        }
        result
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Builds the pooled HTTP client used by [`Transport::new`].
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, errors::Config> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST);

    if let Some(proxy) = config.proxy_config()? {
        debug!("Using proxy {proxy}");
        builder = builder.proxy(proxy.to_reqwest()?);
    }

    builder
        .build()
        .map_err(|e| errors::Config::HttpClient(e.to_string()))
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
