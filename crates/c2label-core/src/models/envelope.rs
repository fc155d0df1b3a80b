//! CloudEvent envelope model

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

/// A CloudEvent as received from the broker
///
/// Only the context attributes the responder looks at are kept; the data is
/// left undecoded until the event is known to come from Falco.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// Event id, unique per source
    pub id: String,

    /// Producer of the event
    pub source: String,

    /// Schema of the payload
    pub event_type: String,

    /// CloudEvents spec version
    pub spec_version: String,

    /// When the event was produced, if the producer said so
    pub time: Option<DateTime<Utc>>,

    /// Media type of `data`
    pub data_content_type: Option<String>,

    /// Raw event data
    pub data: Bytes,
}

impl AlertEvent {
    /// Whether the event carries the given `(source, type)` signature
    pub fn is_from(&self, source: &str, event_type: &str) -> bool {
        self.source == source && self.event_type == event_type
    }

    /// Decode the event data as JSON
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }
}
