//! # c2label
//!
//! Falco response bridge that labels Kubernetes pods caught talking to
//! command-and-control infrastructure.
//!
//! Falco alerts arrive as CloudEvents; when one reports the
//! `Outbound Connection to C2 Servers` rule, the offending pod gets a
//! `falco-event=c2-server-detected` label so quarantine policies can pick it up.
//!
//! ## Architecture
//!
//! - **Receiver**: CloudEvents over HTTP (binary and structured modes)
//! - **Responder**: source/type filter, payload decode, rule match
//! - **Mutator**: one JSON patch per actionable alert against the pod
//!
//! ## Quick Start
//!
//! ```bash
//! # Run inside the cluster with the pod's service account
//! c2label serve
//!
//! # Print the effective configuration
//! c2label check-config
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod models;
pub mod receiver;
pub mod responder;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::receiver::ReceiverServer;
    pub use crate::responder::{KubeClient, Outcome, Responder, WorkloadLabeler};
}
