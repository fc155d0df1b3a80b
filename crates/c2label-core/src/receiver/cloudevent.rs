//! CloudEvents HTTP protocol binding (binary and structured content modes)

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use thiserror::Error;

use crate::models::AlertEvent;

const STRUCTURED_MEDIA_TYPE: &str = "application/cloudevents+json";
const BATCH_MEDIA_TYPE: &str = "application/cloudevents-batch+json";
const SPEC_VERSIONS: [&str; 2] = ["1.0", "0.3"];

/// Request that is not a CloudEvent this receiver understands
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Required context attribute absent
    #[error("missing required attribute {0}")]
    MissingAttribute(&'static str),

    /// Header value is not visible ASCII
    #[error("attribute {0} is not valid text")]
    InvalidHeader(&'static str),

    /// Only 1.0 and 0.3 are accepted
    #[error("unsupported specversion {0:?}")]
    UnsupportedSpecVersion(String),

    /// `time` is not RFC 3339
    #[error("invalid time attribute {0:?}")]
    InvalidTime(String),

    /// Structured envelope failed to parse
    #[error("invalid structured event: {0}")]
    Structured(#[from] serde_json::Error),

    /// `data_base64` is not base64
    #[error("invalid data_base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Batched mode is not supported
    #[error("batched content mode is not supported")]
    Batch,
}

/// Decode an HTTP request into an envelope
pub fn from_http(headers: &HeaderMap, body: Bytes) -> Result<AlertEvent, EnvelopeError> {
    let content_type = header(headers, CONTENT_TYPE.as_str(), "content-type")?;
    let media_type = content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match media_type.as_deref() {
        Some(STRUCTURED_MEDIA_TYPE) => from_structured(&body),
        Some(BATCH_MEDIA_TYPE) => Err(EnvelopeError::Batch),
        _ => from_binary(headers, content_type, body),
    }
}

fn from_binary(
    headers: &HeaderMap,
    content_type: Option<String>,
    body: Bytes,
) -> Result<AlertEvent, EnvelopeError> {
    let spec_version = required(headers, "ce-specversion", "specversion")?;
    check_spec_version(&spec_version)?;

    let time = ce_attribute(headers, "ce-time", "time")?
        .map(|t| parse_time(&t))
        .transpose()?;

    Ok(AlertEvent {
        id: required(headers, "ce-id", "id")?,
        source: required(headers, "ce-source", "source")?,
        event_type: required(headers, "ce-type", "type")?,
        spec_version,
        time,
        data_content_type: content_type,
        data: body,
    })
}

/// JSON envelope of the structured content mode
#[derive(Debug, Deserialize)]
struct StructuredEvent {
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    specversion: String,
    time: Option<String>,
    datacontenttype: Option<String>,
    data: Option<serde_json::Value>,
    data_base64: Option<String>,
}

fn from_structured(body: &[u8]) -> Result<AlertEvent, EnvelopeError> {
    let event: StructuredEvent = serde_json::from_slice(body)?;
    check_spec_version(&event.specversion)?;

    let time = event.time.as_deref().map(parse_time).transpose()?;

    let data = match (event.data, event.data_base64) {
        (_, Some(encoded)) => Bytes::from(base64::engine::general_purpose::STANDARD.decode(encoded)?),
        // A string under a non-JSON content type is the payload itself.
        (Some(serde_json::Value::String(text)), _) if !is_json(event.datacontenttype.as_deref()) => {
            Bytes::from(text)
        }
        (Some(value), _) => Bytes::from(serde_json::to_vec(&value)?),
        (None, None) => Bytes::new(),
    };

    Ok(AlertEvent {
        id: event.id,
        source: event.source,
        event_type: event.event_type,
        spec_version: event.specversion,
        time,
        data_content_type: event.datacontenttype,
        data,
    })
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.map_or(true, |ct| {
        let ct = ct.to_ascii_lowercase();
        ct.starts_with("application/json") || ct.contains("+json")
    })
}

fn check_spec_version(version: &str) -> Result<(), EnvelopeError> {
    if SPEC_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(EnvelopeError::UnsupportedSpecVersion(version.to_string()))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, EnvelopeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EnvelopeError::InvalidTime(raw.to_string()))
}

fn header(
    headers: &HeaderMap,
    name: &str,
    attribute: &'static str,
) -> Result<Option<String>, EnvelopeError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| EnvelopeError::InvalidHeader(attribute))
        })
        .transpose()
}

/// A `ce-*` header, percent-decoded as the HTTP binding requires
fn ce_attribute(
    headers: &HeaderMap,
    name: &str,
    attribute: &'static str,
) -> Result<Option<String>, EnvelopeError> {
    header(headers, name, attribute)?
        .map(|raw| {
            percent_decode_str(&raw)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| EnvelopeError::InvalidHeader(attribute))
        })
        .transpose()
}

fn required(headers: &HeaderMap, name: &str, attribute: &'static str) -> Result<String, EnvelopeError> {
    ce_attribute(headers, name, attribute)?
        .filter(|v| !v.is_empty())
        .ok_or(EnvelopeError::MissingAttribute(attribute))
}
