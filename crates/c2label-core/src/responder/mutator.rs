//! Workload labeling seam

use async_trait::async_trait;
use thiserror::Error;

use crate::models::LabelMutation;

/// Applies label mutations to pods
///
/// Implementations are shared by every in-flight event, so they must be
/// safe for concurrent use.
#[async_trait]
pub trait WorkloadLabeler: Send + Sync {
    /// Attach `mutation.key = mutation.value` to the pod, overwriting any existing value
    async fn add_label(&self, mutation: &LabelMutation) -> Result<(), MutationError>;
}

/// Why a single patch call failed
#[derive(Debug, Error)]
pub enum MutationError {
    /// Pod (or namespace) does not exist, typically already evicted
    #[error("pod not found: {0}")]
    NotFound(String),

    /// Credentials were rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Service account lacks `patch` on pods
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The call did not finish before its deadline
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// API server unreachable or overloaded
    #[error("API unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status, 0 when the connection failed
        status: u16,
        /// Server or transport message
        message: String,
    },

    /// The API server refused the patch
    #[error("patch rejected ({status}): {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Server message
        message: String,
    },

    /// Anything else on the wire
    #[error("transport error: {0}")]
    Transport(String),
}

impl MutationError {
    /// A pod that no longer exists is not worth alerting on
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Timeout(_) => "timeout",
            Self::Unavailable { .. } => "unavailable",
            Self::Rejected { .. } => "rejected",
            Self::Transport(_) => "transport",
        }
    }
}
