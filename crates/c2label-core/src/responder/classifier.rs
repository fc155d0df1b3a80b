//! Event eligibility, decoding and rule matching
//!
//! Classification is pure: it never performs I/O and never fails. Every
//! envelope ends up in exactly one [`Classification`] variant.

use crate::config::ResponderConfig;
use crate::models::{AlertEvent, SecurityAlert};

/// What to match events against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Expected CloudEvent source
    pub source: String,
    /// Expected CloudEvent type
    pub event_type: String,
    /// Rule name that makes an alert actionable
    pub rule: String,
}

impl From<&ResponderConfig> for MatchPolicy {
    fn from(config: &ResponderConfig) -> Self {
        Self {
            source: config.source.clone(),
            event_type: config.event_type.clone(),
            rule: config.rule.clone(),
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from(&ResponderConfig::default())
    }
}

/// Outcome of classifying one envelope
#[derive(Debug)]
pub enum Classification {
    /// Not a Falco rule output; never decoded
    Ignored,
    /// Eligible, but the payload did not decode
    Malformed(serde_json::Error),
    /// Decoded, but for a different rule
    Unmatched {
        /// The rule that fired
        rule: String,
    },
    /// Target rule, but without a namespace or pod to act on
    MissingLocator(Box<SecurityAlert>),
    /// Target rule with a usable locator
    Actionable(Box<SecurityAlert>),
}

/// Classify an envelope against the policy
pub fn classify(event: &AlertEvent, policy: &MatchPolicy) -> Classification {
    if !event.is_from(&policy.source, &policy.event_type) {
        return Classification::Ignored;
    }

    let alert: SecurityAlert = match event.data_as() {
        Ok(alert) => alert,
        Err(e) => return Classification::Malformed(e),
    };

    if alert.rule != policy.rule {
        return Classification::Unmatched { rule: alert.rule };
    }

    if alert.locator().is_none() {
        return Classification::MissingLocator(Box::new(alert));
    }

    Classification::Actionable(Box::new(alert))
}
