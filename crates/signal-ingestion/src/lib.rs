// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side delivery pipeline for telemetry signals.
//!
//! Producers hand [`signals::Signal`] values to a [`collector::BatchCollector`],
//! which queues them and ships them in batches to the ingestion backend through
//! an [`client::AuthenticatedClient`]. A batch leaves the queue either when the
//! queue reaches the configured trigger size or when the flush timer fires,
//! whichever comes first. Under sustained overload signals are dropped rather
//! than blocking the producer.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod auth;
pub mod client;
pub mod collector;
pub mod config;
pub mod errors;
pub mod listener;
pub mod proxy;
pub mod serializer;
pub mod signals;
pub mod transport;
