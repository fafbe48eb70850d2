// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use signal_ingestion::{
    auth::{CredentialSource, Credentials},
    client::{BatchReporter, IngestionClient},
    collector::BatchCollector,
    config::{ClientConfig, CollectorConfig},
    signals::Signal,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SIGNAL_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    // Silence noisy dependencies unless explicitly asked for
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse SIGNAL_LOG_LEVEL {log_level}: {e}");
            EnvFilter::new("h2=off,hyper=off,rustls=off,info")
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let client_config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid client configuration: {e}");
            return;
        }
    };
    let collector_config = match CollectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid collector configuration: {e}");
            return;
        }
    };

    let credentials = Credentials::from_env();
    if credentials.session_key.is_none() && credentials.api_key.is_none() {
        warn!("Neither SIGNAL_SESSION_KEY nor SIGNAL_API_KEY is set, requests will be unauthenticated");
    }

    let client = match IngestionClient::new(&client_config) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to create ingestion client: {e}");
            return;
        }
    };
    let client = match client
        .with_authentication(&CredentialSource::from(credentials))
        .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to authenticate ingestion client: {e}");
            return;
        }
    };

    let collector = match BatchCollector::new(
        collector_config,
        Arc::new(client) as Arc<dyn BatchReporter>,
    ) {
        Ok(collector) => collector,
        Err(e) => {
            error!("Unable to create batch collector: {e}");
            return;
        }
    };

    info!(
        "Forwarding signals from stdin to {}",
        client_config.base_url
    );

    tokio::select! {
        forwarded = forward_stdin(&collector) => {
            info!("Reached end of input after {forwarded} signals");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    shutdown(&collector).await;
}

/// Reads one JSON signal per line and queues it. Returns the number of
/// accepted signals.
async fn forward_stdin(collector: &BatchCollector) -> usize {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut forwarded = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return forwarded,
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                return forwarded;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let signal: Signal = match serde_json::from_str(&line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Skipping malformed signal: {e}");
                continue;
            }
        };
        match collector.add(signal) {
            Ok(true) => forwarded += 1,
            Ok(false) => warn!("Signal queue is full, signal dropped"),
            Err(e) => {
                error!("Failed to queue signal: {e}");
                return forwarded;
            }
        }
    }
}

async fn shutdown(collector: &BatchCollector) {
    if let Err(e) = collector.force_report().await {
        error!("Final report failed: {e}");
    }
    if let Err(e) = collector.close() {
        error!("Failed to close collector: {e}");
    }
    if !collector.await_termination(SHUTDOWN_TIMEOUT).await {
        warn!(
            "{} batches still in flight after {}s, exiting anyway",
            collector.active_batches(),
            SHUTDOWN_TIMEOUT.as_secs()
        );
    }
}
