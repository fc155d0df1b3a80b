//! Label mutation intent and its JSON patch rendering

use serde::{Deserialize, Serialize};
use thiserror::Error;

const LABEL_PATH: &str = "/metadata/labels/";
const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// A label to attach to one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMutation {
    /// Label key
    pub key: String,
    /// Label value
    pub value: String,
    /// Namespace of the pod
    pub namespace: String,
    /// Pod name
    pub pod: String,
}

impl LabelMutation {
    /// Create a new mutation
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        namespace: impl Into<String>,
        pod: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    /// JSON pointer to the label, with the key escaped per RFC 6901
    pub fn label_path(&self) -> String {
        let escaped = self.key.replace('~', "~0").replace('/', "~1");
        format!("{LABEL_PATH}{escaped}")
    }

    /// The single-operation JSON patch document
    pub fn to_patch(&self) -> Vec<PatchOperation> {
        vec![PatchOperation {
            op: PatchOp::Add,
            path: self.label_path(),
            value: self.value.clone(),
        }]
    }
}

/// JSON patch operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Create or replace the value at `path`
    Add,
}

/// One RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// Operation kind
    pub op: PatchOp,
    /// JSON pointer
    pub path: String,
    /// Value to set
    pub value: String,
}

/// A label key or value Kubernetes would reject
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid label {what} {input:?}: {reason}")]
pub struct InvalidLabel {
    what: &'static str,
    input: String,
    reason: &'static str,
}

impl InvalidLabel {
    fn new(what: &'static str, input: &str, reason: &'static str) -> Self {
        Self {
            what,
            input: input.to_string(),
            reason,
        }
    }
}

/// Check a label key: `[prefix/]name`
pub fn validate_label_key(key: &str) -> Result<(), InvalidLabel> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
            return Err(InvalidLabel::new("key", key, "prefix must be 1-253 characters"));
        }
        if !is_dns_subdomain(prefix) {
            return Err(InvalidLabel::new("key", key, "prefix must be a DNS subdomain"));
        }
    }

    if name.is_empty() {
        return Err(InvalidLabel::new("key", key, "name must not be empty"));
    }
    if !is_label_name(name) {
        return Err(InvalidLabel::new(
            "key",
            key,
            "name must be at most 63 alphanumerics, '-', '_' or '.', starting and ending alphanumeric",
        ));
    }
    Ok(())
}

/// Check a label value; empty values are allowed
pub fn validate_label_value(value: &str) -> Result<(), InvalidLabel> {
    if value.is_empty() || is_label_name(value) {
        Ok(())
    } else {
        Err(InvalidLabel::new(
            "value",
            value,
            "must be at most 63 alphanumerics, '-', '_' or '.', starting and ending alphanumeric",
        ))
    }
}

fn is_label_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            s.len() <= MAX_NAME_LEN
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

fn is_dns_subdomain(s: &str) -> bool {
    s.split('.').all(|part| {
        let bytes = part.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                part.len() <= MAX_NAME_LEN
                    && first.is_ascii_alphanumeric()
                    && last.is_ascii_alphanumeric()
                    && bytes
                        .iter()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            }
            _ => false,
        }
    })
}
