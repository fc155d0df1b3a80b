//! Configuration management for c2label
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then `C2LABEL__SECTION__KEY` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{validate_label_key, validate_label_value};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "C2LABEL";

/// Falco's CloudEvent source attribute
pub const FALCO_SOURCE: &str = "falco.org";

/// Falco's CloudEvent type attribute
pub const FALCO_EVENT_TYPE: &str = "falco.rule.output.v1";

/// The detection rule this responder reacts to
pub const C2_RULE: &str = "Outbound Connection to C2 Servers";

/// Label attached to pods flagged by the rule
pub const LABEL_KEY: &str = "falco-event";

/// Value of [`LABEL_KEY`]
pub const LABEL_VALUE: &str = "c2-server-detected";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Rule and label configuration
    pub responder: ResponderConfig,

    /// Kubernetes API configuration
    pub kubernetes: KubernetesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file, and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        Self::load_with_env(path, env)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the responder cannot run with
    pub fn validate(&self) -> Result<()> {
        self.responder.validate()?;
        self.kubernetes.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Address the receiver binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// CloudEvents receiver port
    pub port: u16,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_enabled: true,
        }
    }
}

/// Which events are actionable and what label they produce
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Expected CloudEvent `source`
    pub source: String,
    /// Expected CloudEvent `type`
    pub event_type: String,
    /// Falco rule name that triggers labeling (exact match)
    pub rule: String,
    /// Label key to attach
    pub label_key: String,
    /// Label value to attach
    pub label_value: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            source: FALCO_SOURCE.to_string(),
            event_type: FALCO_EVENT_TYPE.to_string(),
            rule: C2_RULE.to_string(),
            label_key: LABEL_KEY.to_string(),
            label_value: LABEL_VALUE.to_string(),
        }
    }
}

impl ResponderConfig {
    fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::validation("responder.source must not be empty"));
        }
        if self.event_type.is_empty() {
            return Err(Error::validation("responder.event_type must not be empty"));
        }
        if self.rule.is_empty() {
            return Err(Error::validation("responder.rule must not be empty"));
        }
        validate_label_key(&self.label_key)
            .map_err(|e| Error::validation(format!("responder.label_key: {e}")))?;
        validate_label_value(&self.label_value)
            .map_err(|e| Error::validation(format!("responder.label_value: {e}")))?;
        Ok(())
    }
}

/// Kubernetes API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// API server base URL
    pub api_url: String,
    /// File holding the bearer token
    pub token_path: Option<String>,
    /// PEM bundle used to verify the API server
    pub ca_cert_path: Option<String>,
    /// Skip TLS verification (test clusters only)
    pub insecure_skip_tls_verify: bool,
    /// Deadline for a single patch call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            api_url: in_cluster_api_url(),
            token_path: Some(format!("{SERVICE_ACCOUNT_DIR}/token")),
            ca_cert_path: Some(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")),
            insecure_skip_tls_verify: false,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl KubernetesConfig {
    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .map_err(|e| Error::validation(format!("kubernetes.api_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "kubernetes.api_url: unsupported scheme {}",
                url.scheme()
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::validation(
                "kubernetes.request_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// API server address as advertised to pods by the kubelet
fn in_cluster_api_url() -> String {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").ok();
    let port = std::env::var("KUBERNETES_SERVICE_PORT").ok();

    match (host, port) {
        (Some(host), Some(port)) if host.contains(':') => format!("https://[{host}]:{port}"),
        (Some(host), Some(port)) => format!("https://{host}:{port}"),
        _ => "https://kubernetes.default.svc".to_string(),
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        match self.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(Error::validation(format!(
                "logging.format must be \"pretty\" or \"json\", got {other:?}"
            ))),
        }
    }

    /// Whether logs should be emitted as JSON lines
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}
