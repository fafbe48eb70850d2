// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turning request payloads into bytes.

use crate::errors::Ingestion;
use crate::signals::{Signal, Trace};
use serde::{Serialize, Serializer};

/// Body of a request, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Signal(&'a Signal),
    Trace(&'a Trace),
    Batch(&'a [Signal]),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TraceRef<'a> {
    Trace(&'a Trace),
}

impl Serialize for Payload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Payload::Signal(signal) => signal.serialize(serializer),
            // a bare trace still needs its "type" discriminator
            Payload::Trace(trace) => TraceRef::Trace(trace).serialize(serializer),
            Payload::Batch(batch) => batch.serialize(serializer),
        }
    }
}

pub trait PayloadSerializer: Send + Sync {
    fn serialize(&self, payload: &Payload<'_>) -> Result<Vec<u8>, Ingestion>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl PayloadSerializer for JsonSerializer {
    fn serialize(&self, payload: &Payload<'_>) -> Result<Vec<u8>, Ingestion> {
        Ok(serde_json::to_vec(payload)?)
    }
}
