//! Falco alert payload model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Falco priority levels, most severe first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    /// System is unusable
    Emergency,
    /// Action must be taken immediately
    Alert,
    /// Critical conditions
    Critical,
    /// Error conditions
    Error,
    /// Warning conditions
    Warning,
    /// Normal but significant condition
    #[default]
    Notice,
    /// Informational messages
    Informational,
    /// Debug-level messages
    Debug,
    /// A level this build does not know about
    Other(String),
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "emergency" => Self::Emergency,
            "alert" => Self::Alert,
            "critical" => Self::Critical,
            "error" => Self::Error,
            "warning" => Self::Warning,
            "notice" => Self::Notice,
            "informational" | "info" => Self::Informational,
            "debug" => Self::Debug,
            _ => Self::Other(value),
        }
    }
}

impl From<Priority> for String {
    fn from(priority: Priority) -> Self {
        priority.to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emergency => "Emergency",
            Self::Alert => "Alert",
            Self::Critical => "Critical",
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Notice => "Notice",
            Self::Informational => "Informational",
            Self::Debug => "Debug",
            Self::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// A decoded Falco rule output
///
/// Only `rule` is required. Descriptive fields that are absent or `null`
/// decode to their defaults so they never keep an alert from acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Human-readable description rendered by Falco
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: String,

    /// Severity of the matched rule
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: Priority,

    /// Name of the matched detection rule
    pub rule: String,

    /// When Falco raised the alert
    #[serde(default, deserialize_with = "null_as_default")]
    pub time: Option<DateTime<Utc>>,

    /// Locator and forensic fields
    #[serde(rename = "output_fields", default)]
    pub fields: AlertFields,
}

impl SecurityAlert {
    /// The `(namespace, pod)` pair, if both are present
    ///
    /// Names are passed through as Falco reported them; whitespace-only
    /// values count as absent.
    pub fn locator(&self) -> Option<(&str, &str)> {
        let namespace = self.fields.namespace.as_str();
        let pod = self.fields.pod.as_str();
        if namespace.trim().is_empty() || pod.trim().is_empty() {
            None
        } else {
            Some((namespace, pod))
        }
    }
}

/// Falco `output_fields`
///
/// Falco emits `null` for fields it could not resolve (a host process has no
/// container image, for example), so every field falls back to its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFields {
    /// Container id
    #[serde(rename = "container.id", default, deserialize_with = "null_as_default")]
    pub container_id: String,

    /// Container image repository
    #[serde(
        rename = "container.image.repository",
        default,
        deserialize_with = "null_as_default"
    )]
    pub container_image_repository: String,

    /// Kubernetes namespace of the pod
    #[serde(rename = "k8s.ns.name", default, deserialize_with = "null_as_default")]
    pub namespace: String,

    /// Kubernetes pod name
    #[serde(rename = "k8s.pod.name", default, deserialize_with = "null_as_default")]
    pub pod: String,

    /// Full command line
    #[serde(rename = "proc.cmdline", default, deserialize_with = "null_as_default")]
    pub proc_cmdline: String,

    /// Process name
    #[serde(rename = "proc.name", default, deserialize_with = "null_as_default")]
    pub proc_name: String,

    /// Parent process name
    #[serde(rename = "proc.pname", default, deserialize_with = "null_as_default")]
    pub proc_pname: String,

    /// Controlling terminal
    #[serde(rename = "proc.tty", default, deserialize_with = "null_as_default")]
    pub proc_tty: i64,

    /// Audit login uid (-1 when unset)
    #[serde(rename = "user.loginuid", default, deserialize_with = "null_as_default")]
    pub user_loginuid: i64,

    /// User name
    #[serde(rename = "user.name", default, deserialize_with = "null_as_default")]
    pub user_name: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn falco_payload() -> serde_json::Value {
        json!({
            "output": "14:02:11.123: Critical Outbound connection to C2 server (command=curl evil.example)",
            "priority": "Critical",
            "rule": "Outbound Connection to C2 Servers",
            "time": "2024-03-01T14:02:11.123456789Z",
            "output_fields": {
                "container.id": "3ad7b26ded6d",
                "container.image.repository": "nginx",
                "k8s.ns.name": "prod",
                "k8s.pod.name": "web-7f9",
                "proc.cmdline": "curl evil.example",
                "proc.name": "curl",
                "proc.pname": "sh",
                "proc.tty": 34816,
                "user.loginuid": -1,
                "user.name": "root",
                "fd.name": "10.0.0.4:41200->203.0.113.9:443"
            }
        })
    }

    #[test]
    fn decodes_falco_output() {
        let alert: SecurityAlert = serde_json::from_value(falco_payload()).unwrap();

        assert_eq!(alert.rule, "Outbound Connection to C2 Servers");
        assert_eq!(alert.priority, Priority::Critical);
        assert_eq!(alert.fields.namespace, "prod");
        assert_eq!(alert.fields.pod, "web-7f9");
        assert_eq!(alert.fields.proc_tty, 34816);
        assert_eq!(alert.fields.user_loginuid, -1);
        assert_eq!(alert.fields.container_image_repository, "nginx");
        assert_eq!(alert.locator(), Some(("prod", "web-7f9")));
    }

    #[test]
    fn null_fields_fall_back_to_defaults() {
        let mut payload = falco_payload();
        payload["output_fields"]["container.image.repository"] = json!(null);
        payload["output_fields"]["proc.tty"] = json!(null);

        let alert: SecurityAlert = serde_json::from_value(payload).unwrap();

        assert_eq!(alert.fields.container_image_repository, "");
        assert_eq!(alert.fields.proc_tty, 0);
    }

    #[test]
    fn missing_locator() {
        let mut payload = falco_payload();
        payload["output_fields"]["k8s.pod.name"] = json!(null);

        let alert: SecurityAlert = serde_json::from_value(payload).unwrap();
        assert_eq!(alert.locator(), None);
    }

    #[rstest]
    #[case("time")]
    #[case("output")]
    #[case("priority")]
    fn missing_descriptive_fields_still_decode(#[case] field: &str) {
        let mut payload = falco_payload();
        payload.as_object_mut().unwrap().remove(field);

        let alert: SecurityAlert = serde_json::from_value(payload).unwrap();
        assert_eq!(alert.locator(), Some(("prod", "web-7f9")));
    }

    #[test]
    fn null_descriptive_fields_fall_back_to_defaults() {
        let mut payload = falco_payload();
        payload["time"] = json!(null);
        payload["output"] = json!(null);
        payload["priority"] = json!(null);

        let alert: SecurityAlert = serde_json::from_value(payload).unwrap();

        assert_eq!(alert.time, None);
        assert_eq!(alert.output, "");
        assert_eq!(alert.priority, Priority::Notice);
        assert_eq!(alert.rule, "Outbound Connection to C2 Servers");
    }

    #[test]
    fn time_keeps_nanoseconds() {
        let alert: SecurityAlert = serde_json::from_value(falco_payload()).unwrap();
        let time = alert.time.unwrap();

        assert_eq!(time.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn locator_passes_names_through() {
        let mut payload = falco_payload();
        payload["output_fields"]["k8s.pod.name"] = json!(" web-7f9");

        let alert: SecurityAlert = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(alert.locator(), Some(("prod", " web-7f9")));

        payload["output_fields"]["k8s.ns.name"] = json!("  ");
        let alert: SecurityAlert = serde_json::from_value(payload).unwrap();
        assert_eq!(alert.locator(), None);
    }

    #[test]
    fn type_mismatch_is_a_decode_error() {
        let mut payload = falco_payload();
        payload["output_fields"]["proc.tty"] = json!("not-a-number");

        assert!(serde_json::from_value::<SecurityAlert>(payload).is_err());
    }

    #[test]
    fn rule_is_required() {
        let mut payload = falco_payload();
        payload.as_object_mut().unwrap().remove("rule");

        assert!(serde_json::from_value::<SecurityAlert>(payload).is_err());
    }

    #[rstest]
    #[case("Emergency", Priority::Emergency)]
    #[case("CRITICAL", Priority::Critical)]
    #[case("warning", Priority::Warning)]
    #[case("Informational", Priority::Informational)]
    #[case("info", Priority::Informational)]
    #[case("Verbose", Priority::Other("Verbose".to_string()))]
    fn parses_priority(#[case] raw: &str, #[case] expected: Priority) {
        assert_eq!(Priority::from(raw.to_string()), expected);
    }

    #[test]
    fn priority_round_trips_through_display() {
        assert_eq!(Priority::Critical.to_string(), "Critical");
        assert_eq!(Priority::Other("Verbose".into()).to_string(), "Verbose");
    }
}
