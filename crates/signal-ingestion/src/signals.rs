// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal records as they are sent on the wire.
//!
//! A signal is a single telemetry event (an attack, an exception, a metric or
//! an agent message). A trace bundles several signals that share a context,
//! typically one HTTP request. Both serialize to JSON objects carrying a
//! `"type"` discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form JSON object used for payloads, contexts and locations.
pub type Object = Map<String, Value>;

/// Fields shared by every kind of signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBody {
    #[serde(rename = "signal_name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_schema: Option<String>,
    pub payload: Object,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_infra: Option<LocationInfra>,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl SignalBody {
    /// Creates a body with the given payload, timestamped now.
    #[must_use]
    pub fn new(payload: Object) -> Self {
        Self {
            name: None,
            payload_schema: None,
            payload,
            actor: None,
            context_schema: None,
            context: None,
            source: None,
            trigger: None,
            location: None,
            location_infra: None,
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, payload: Object) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(payload)
        }
    }
}

/// Who triggered the signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addresses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Vec<String>>,
}

/// Where the signal was produced, in terms of host and runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra: Option<Infra>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

/// A set of signals originating from a common context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(flatten)]
    pub body: SignalBody,
    #[serde(default)]
    pub data: Vec<Signal>,
}

impl Trace {
    #[must_use]
    pub fn new(body: SignalBody) -> Self {
        Self {
            body,
            data: Vec::new(),
        }
    }

    pub fn add_signal(&mut self, signal: Signal) {
        self.data.push(signal);
    }
}

/// One telemetry event. The queueing layer treats it as an opaque unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Point(SignalBody),
    Metric(SignalBody),
    Trace(Trace),
}

impl Signal {
    #[must_use]
    pub fn point(body: SignalBody) -> Self {
        Self::Point(body)
    }

    #[must_use]
    pub fn metric(body: SignalBody) -> Self {
        Self::Metric(body)
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Point(_) => "point",
            Self::Metric(_) => "metric",
            Self::Trace(_) => "trace",
        }
    }

    #[must_use]
    pub fn body(&self) -> &SignalBody {
        match self {
            Self::Point(body) | Self::Metric(body) => body,
            Self::Trace(trace) => &trace.body,
        }
    }
}

impl From<Trace> for Signal {
    fn from(trace: Trace) -> Self {
        Self::Trace(trace)
    }
}
