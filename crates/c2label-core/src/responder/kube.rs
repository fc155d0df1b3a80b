//! Kubernetes API client for pod label patches

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::KubernetesConfig;
use crate::error::{Error, Result};
use crate::models::LabelMutation;

use super::mutator::{MutationError, WorkloadLabeler};

const JSON_PATCH: &str = "application/json-patch+json";

/// Where the bearer token comes from
#[derive(Clone)]
enum TokenSource {
    None,
    Static(String),
    /// Re-read on every call; the kubelet rotates projected tokens in place.
    File(PathBuf),
}

/// Patches pods through the Kubernetes REST API
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    base_url: Url,
    token: TokenSource,
    timeout: Duration,
}

impl KubeClient {
    /// Build a client from configuration
    ///
    /// Fails if the CA bundle or token file is configured but unreadable.
    pub fn new(config: &KubernetesConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| Error::client(format!("invalid API URL {}: {e}", config.api_url)))?;

        let mut builder = Client::builder()
            .user_agent(concat!("c2label/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout);

        if let Some(ca_path) = non_empty(config.ca_cert_path.as_deref()) {
            let pem = std::fs::read(ca_path)
                .map_err(|e| Error::client(format!("failed to read CA bundle {ca_path}: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::client(format!("invalid CA bundle {ca_path}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let token = match non_empty(config.token_path.as_deref()) {
            Some(path) => {
                std::fs::metadata(path)
                    .map_err(|e| Error::client(format!("failed to read token {path}: {e}")))?;
                TokenSource::File(PathBuf::from(path))
            }
            None => TokenSource::None,
        };

        let client = builder
            .build()
            .map_err(|e| Error::client(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
            timeout: config.request_timeout,
        })
    }

    /// Client against an explicit API URL with a fixed token
    pub fn with_base_url(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::client(format!("invalid API URL {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::client(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.map_or(TokenSource::None, TokenSource::Static),
            timeout,
        })
    }

    /// `/api/v1/namespaces/{namespace}/pods/{pod}` under the base URL
    fn pod_url(&self, namespace: &str, pod: &str) -> std::result::Result<Url, MutationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| MutationError::Transport(format!("API URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "pods", pod]);
        Ok(url)
    }

    async fn bearer_token(&self) -> std::result::Result<Option<String>, MutationError> {
        match &self.token {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map(|token| Some(token.trim().to_string()))
                .map_err(|e| {
                    MutationError::Unauthorized(format!("cannot read token {}: {e}", path.display()))
                }),
        }
    }

    fn classify_send_error(&self, err: &reqwest::Error) -> MutationError {
        if err.is_timeout() {
            MutationError::Timeout(self.timeout)
        } else if err.is_connect() {
            MutationError::Unavailable {
                status: 0,
                message: err.to_string(),
            }
        } else {
            MutationError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl WorkloadLabeler for KubeClient {
    async fn add_label(&self, mutation: &LabelMutation) -> std::result::Result<(), MutationError> {
        let url = self.pod_url(&mutation.namespace, &mutation.pod)?;
        let body = serde_json::to_vec(&mutation.to_patch())
            .map_err(|e| MutationError::Transport(e.to_string()))?;

        let mut request = self
            .client
            .patch(url.clone())
            .header(CONTENT_TYPE, JSON_PATCH)
            .timeout(self.timeout)
            .body(body);

        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, path = %mutation.label_path(), "Patching pod");

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// Subset of `meta/v1.Status` returned on API errors
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

fn status_error(status: StatusCode, body: &str) -> MutationError {
    let message = serde_json::from_str::<ApiStatus>(body)
        .ok()
        .map(|s| s.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => MutationError::NotFound(message),
        StatusCode::UNAUTHORIZED => MutationError::Unauthorized(message),
        StatusCode::FORBIDDEN => MutationError::Forbidden(message),
        StatusCode::TOO_MANY_REQUESTS => MutationError::Unavailable {
            status: status.as_u16(),
            message,
        },
        s if s.is_server_error() => MutationError::Unavailable {
            status: s.as_u16(),
            message,
        },
        s => MutationError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
