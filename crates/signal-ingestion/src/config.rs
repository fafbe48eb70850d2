// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors;
use crate::proxy::ProxyConfig;
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INGESTION_URL: &str = "https://ingestion.sqreen.com/";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10_000);

pub const DEFAULT_TRIGGER_SIZE: usize = 30;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 3;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(60_000);

/// Configuration of the HTTP side: where to send and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the ingestion backend; request paths are appended to it
    pub base_url: String,
    /// Maximum time to establish a connection
    pub connect_timeout: Duration,
    /// Maximum time to wait for the backend to answer
    pub read_timeout: Duration,
    /// Proxy specification, `scheme://[user:pass@]host:port`
    pub proxy: Option<String>,
    /// Whether request bodies are gzip-compressed
    pub compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_INGESTION_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            proxy: None,
            compression: false,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, errors::Config> {
        let defaults = Self::default();
        let base_url = env::var("SIGNAL_INGESTION_URL").unwrap_or(defaults.base_url);
        let connect_timeout = env_millis("SIGNAL_CONNECT_TIMEOUT_MS")?
            .unwrap_or(defaults.connect_timeout);
        let read_timeout =
            env_millis("SIGNAL_READ_TIMEOUT_MS")?.unwrap_or(defaults.read_timeout);
        let proxy = env::var("SIGNAL_PROXY")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok()
            .filter(|spec| !spec.trim().is_empty());
        let compression = env::var("SIGNAL_COMPRESSION")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);

        let config = Self {
            base_url,
            connect_timeout,
            read_timeout,
            proxy,
            compression,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), errors::Config> {
        let url = Url::parse(&self.base_url).map_err(|e| errors::Config::InvalidUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(errors::Config::InvalidUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(errors::Config::InvalidValue {
                field: "connect_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.read_timeout.is_zero() {
            return Err(errors::Config::InvalidValue {
                field: "read_timeout",
                reason: "must be positive".to_string(),
            });
        }

        self.proxy_config()?;
        Ok(())
    }

    pub fn proxy_config(&self) -> Result<Option<ProxyConfig>, errors::Config> {
        match &self.proxy {
            Some(spec) => ProxyConfig::parse(spec),
            None => Ok(None),
        }
    }
}

/// Batching policy of a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Queue length at which a flush is attempted right away
    pub trigger_size: usize,
    /// Ceiling on queued-but-unsent signals; `None` means ten times the trigger size
    pub max_queue_size: Option<usize>,
    /// Maximum number of batch submissions in flight
    pub max_concurrent_requests: usize,
    /// Maximum time between two flush attempts
    pub max_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            trigger_size: DEFAULT_TRIGGER_SIZE,
            max_queue_size: None,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, errors::Config> {
        let defaults = Self::default();
        let config = Self {
            trigger_size: env_usize("SIGNAL_TRIGGER_SIZE")?.unwrap_or(defaults.trigger_size),
            max_queue_size: env_usize("SIGNAL_MAX_QUEUE_SIZE")?,
            max_concurrent_requests: env_usize("SIGNAL_MAX_CONCURRENT_REQUESTS")?
                .unwrap_or(defaults.max_concurrent_requests),
            max_delay: env_millis("SIGNAL_MAX_DELAY_MS")?.unwrap_or(defaults.max_delay),
        };

        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn effective_max_queue_size(&self) -> usize {
        self.max_queue_size
            .unwrap_or_else(|| self.trigger_size.saturating_mul(10))
    }

    pub fn validate(&self) -> Result<(), errors::Config> {
        let positive = |field: &'static str, value: usize| {
            if value == 0 {
                Err(errors::Config::InvalidValue {
                    field,
                    reason: "must be positive".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("trigger_size", self.trigger_size)?;
        if let Some(max_queue_size) = self.max_queue_size {
            positive("max_queue_size", max_queue_size)?;
        }
        positive("max_concurrent_requests", self.max_concurrent_requests)?;
        if self.max_delay.is_zero() {
            return Err(errors::Config::InvalidValue {
                field: "max_delay",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn env_usize(name: &'static str) -> Result<Option<usize>, errors::Config> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| errors::Config::InvalidValue {
                field: name,
                reason: format!("'{raw}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, errors::Config> {
    Ok(env_usize(name)?.map(|ms| Duration::from_millis(ms as u64)))
}
