//! Responder - turns Falco alerts into pod labels
//!
//! Each inbound envelope is classified (source/type filter, payload decode,
//! rule match) and, when actionable, produces exactly one label patch
//! against the pod named in the alert. Nothing is retried or queued: every
//! outcome ends in a log line and a counter.

mod classifier;
mod kube;
mod mutator;

pub use classifier::{classify, Classification, MatchPolicy};
pub use kube::KubeClient;
pub use mutator::{MutationError, WorkloadLabeler};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::config::ResponderConfig;
use crate::models::{AlertEvent, LabelMutation};

/// Final state of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Foreign source/type
    Ignored,
    /// Payload did not decode
    Malformed,
    /// Different rule
    Unmatched,
    /// Target rule without namespace/pod
    MissingLocator,
    /// Label applied
    Labeled,
    /// Patch call failed
    Failed(&'static str),
}

impl Outcome {
    /// Short label used for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Malformed => "malformed",
            Self::Unmatched => "unmatched",
            Self::MissingLocator => "missing_locator",
            Self::Labeled => "labeled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Event handler shared by every request
pub struct Responder {
    policy: MatchPolicy,
    label_key: String,
    label_value: String,
    call_timeout: Duration,
    labeler: Arc<dyn WorkloadLabeler>,
}

impl Responder {
    /// Create a responder around an injected labeler
    pub fn new(
        config: &ResponderConfig,
        call_timeout: Duration,
        labeler: Arc<dyn WorkloadLabeler>,
    ) -> Self {
        Self {
            policy: MatchPolicy::from(config),
            label_key: config.label_key.clone(),
            label_value: config.label_value.clone(),
            call_timeout,
            labeler,
        }
    }

    /// The policy events are matched against
    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Handle one envelope to completion
    ///
    /// Never fails: every error is logged here and reflected in the outcome.
    #[instrument(
        name = "event",
        skip_all,
        fields(event_id = %event.id, source = %event.source, event_type = %event.event_type)
    )]
    pub async fn handle(&self, event: &AlertEvent) -> Outcome {
        let outcome = match classify(event, &self.policy) {
            Classification::Ignored => {
                info!("Ignoring event from unexpected source or type");
                Outcome::Ignored
            }
            Classification::Malformed(e) => {
                warn!(error = %e, "Failed to parse Falco payload from event");
                Outcome::Malformed
            }
            Classification::Unmatched { rule } => {
                debug!(rule = %rule, "Rule not handled by this responder");
                Outcome::Unmatched
            }
            Classification::MissingLocator(alert) => {
                warn!(
                    rule = %alert.rule,
                    namespace = %alert.fields.namespace,
                    pod = %alert.fields.pod,
                    "Alert carries no namespace or pod, nothing to label"
                );
                Outcome::MissingLocator
            }
            Classification::Actionable(alert) => {
                let (namespace, pod) = alert.locator().unwrap_or_default();
                let mutation =
                    LabelMutation::new(&self.label_key, &self.label_value, namespace, pod);

                match self.apply(&mutation).await {
                    Ok(()) => {
                        info!(
                            rule = %alert.rule,
                            namespace = %mutation.namespace,
                            pod = %mutation.pod,
                            priority = %alert.priority,
                            "[{}] labeled {} from {} because {}",
                            alert.rule,
                            mutation.pod,
                            mutation.namespace,
                            alert.output
                        );
                        Outcome::Labeled
                    }
                    Err(e) if e.is_benign() => {
                        warn!(
                            rule = %alert.rule,
                            namespace = %mutation.namespace,
                            pod = %mutation.pod,
                            error = %e,
                            "Pod is gone, dropping label"
                        );
                        metrics::counter!("c2label_mutation_failures_total", "kind" => e.kind())
                            .increment(1);
                        Outcome::Failed(e.kind())
                    }
                    Err(e) => {
                        error!(
                            rule = %alert.rule,
                            namespace = %mutation.namespace,
                            pod = %mutation.pod,
                            error = %e,
                            "Failed to label pod from event"
                        );
                        metrics::counter!("c2label_mutation_failures_total", "kind" => e.kind())
                            .increment(1);
                        Outcome::Failed(e.kind())
                    }
                }
            }
        };

        metrics::counter!("c2label_events_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    /// One patch call, bounded by the call deadline whatever the labeler does
    async fn apply(&self, mutation: &LabelMutation) -> Result<(), MutationError> {
        tokio::time::timeout(self.call_timeout, self.labeler.add_label(mutation))
            .await
            .map_err(|_| MutationError::Timeout(self.call_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing::subscriber::DefaultGuard;

    #[derive(Default)]
    struct RecordingLabeler {
        calls: Mutex<Vec<LabelMutation>>,
        fail_with_not_found: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl WorkloadLabeler for RecordingLabeler {
        async fn add_label(&self, mutation: &LabelMutation) -> Result<(), MutationError> {
            self.calls.lock().unwrap().push(mutation.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_with_not_found {
                return Err(MutationError::NotFound(format!("pods \"{}\" not found", mutation.pod)));
            }
            Ok(())
        }
    }

    fn responder(labeler: Arc<RecordingLabeler>) -> Responder {
        Responder::new(&ResponderConfig::default(), Duration::from_secs(5), labeler)
    }

    fn falco_event(rule: &str, namespace: &str, pod: &str) -> AlertEvent {
        let data = json!({
            "output": format!("Outbound connection from {pod}"),
            "priority": "Critical",
            "rule": rule,
            "time": "2024-03-01T14:02:11Z",
            "output_fields": {
                "container.id": "3ad7b26ded6d",
                "k8s.ns.name": namespace,
                "k8s.pod.name": pod,
                "proc.name": "curl",
                "proc.tty": 0,
                "user.loginuid": -1,
                "user.name": "root"
            }
        });
        AlertEvent {
            id: format!("{namespace}/{pod}"),
            source: "falco.org".to_string(),
            event_type: "falco.rule.output.v1".to_string(),
            spec_version: "1.0".to_string(),
            time: None,
            data_content_type: Some("application/json".to_string()),
            data: Bytes::from(data.to_string()),
        }
    }

    const C2: &str = "Outbound Connection to C2 Servers";

    /// Formatted log output captured for the current thread
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn install(&self) -> DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(move || writer.clone())
                .with_ansi(false)
                .without_time()
                .with_target(false)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn lines_at(&self, levels: &[&str]) -> Vec<String> {
            let output = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            output
                .lines()
                .filter(|line| {
                    let level = line.split_whitespace().next().unwrap_or_default();
                    levels.contains(&level)
                })
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test]
    async fn labels_target_pod_once() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());

        let outcome = responder.handle(&falco_event(C2, "prod", "web-7f9")).await;

        assert_eq!(outcome, Outcome::Labeled);
        assert_eq!(
            *labeler.calls.lock().unwrap(),
            vec![LabelMutation::new("falco-event", "c2-server-detected", "prod", "web-7f9")]
        );
    }

    #[tokio::test]
    async fn foreign_source_never_mutates() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());

        let mut event = falco_event(C2, "prod", "web-7f9");
        event.source = "github.com/cloudevents".to_string();

        assert_eq!(responder.handle(&event).await, Outcome::Ignored);
        assert!(labeler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_rules_never_mutate() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());

        let outcome = responder
            .handle(&falco_event("Terminal shell in container", "prod", "web-7f9"))
            .await;

        assert_eq!(outcome, Outcome::Unmatched);
        assert!(labeler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_never_mutates() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());

        let mut event = falco_event(C2, "prod", "web-7f9");
        event.data = Bytes::from_static(b"{\"rule\": \"Outbound");

        let logs = CapturedLogs::default();
        let _guard = logs.install();

        assert_eq!(responder.handle(&event).await, Outcome::Malformed);
        assert!(labeler.calls.lock().unwrap().is_empty());

        let warnings = logs.lines_at(&["WARN", "ERROR"]);
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains("Failed to parse Falco payload"));
    }

    #[tokio::test]
    async fn sparse_alert_is_still_labeled() {
        for data in [
            json!({"rule": C2, "output_fields": {"k8s.ns.name": "prod", "k8s.pod.name": "web-7f9"}}),
            json!({"rule": C2, "time": null, "output": null, "priority": null,
                   "output_fields": {"k8s.ns.name": "prod", "k8s.pod.name": "web-7f9"}}),
        ] {
            let labeler = Arc::new(RecordingLabeler::default());
            let responder = responder(labeler.clone());

            let mut event = falco_event(C2, "prod", "web-7f9");
            event.data = Bytes::from(data.to_string());

            assert_eq!(responder.handle(&event).await, Outcome::Labeled);
            assert_eq!(
                *labeler.calls.lock().unwrap(),
                vec![LabelMutation::new("falco-event", "c2-server-detected", "prod", "web-7f9")]
            );
        }
    }

    #[tokio::test]
    async fn missing_pod_never_mutates() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());

        let outcome = responder.handle(&falco_event(C2, "prod", "")).await;

        assert_eq!(outcome, Outcome::MissingLocator);
        assert!(labeler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_patch_is_not_retried() {
        let labeler = Arc::new(RecordingLabeler {
            fail_with_not_found: true,
            ..Default::default()
        });
        let responder = responder(labeler.clone());
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let first = responder.handle(&falco_event(C2, "prod", "gone-1")).await;
        assert_eq!(first, Outcome::Failed("not_found"));
        assert_eq!(labeler.calls.lock().unwrap().len(), 1);

        let failures = logs.lines_at(&["WARN", "ERROR"]);
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert!(failures[0].contains("namespace=prod"));
        assert!(failures[0].contains("pod=gone-1"));

        // The responder keeps serving after a failure.
        let second = responder.handle(&falco_event(C2, "prod", "gone-2")).await;
        assert_eq!(second, Outcome::Failed("not_found"));
        assert_eq!(labeler.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn slow_labeler_hits_deadline() {
        let labeler = Arc::new(RecordingLabeler {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let responder =
            Responder::new(&ResponderConfig::default(), Duration::from_millis(50), labeler.clone());

        let outcome = responder.handle(&falco_event(C2, "prod", "web-7f9")).await;

        assert_eq!(outcome, Outcome::Failed("timeout"));
        assert_eq!(labeler.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_alerts_issue_duplicate_calls() {
        let labeler = Arc::new(RecordingLabeler::default());
        let responder = responder(labeler.clone());
        let event = falco_event(C2, "prod", "web-7f9");

        assert_eq!(responder.handle(&event).await, Outcome::Labeled);
        assert_eq!(responder.handle(&event).await, Outcome::Labeled);

        let calls = labeler.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_keep_their_own_locator() {
        const N: usize = 64;

        let labeler = Arc::new(RecordingLabeler {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let responder = Arc::new(responder(labeler.clone()));
        let labeled = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let responder = Arc::clone(&responder);
                let labeled = Arc::clone(&labeled);
                tokio::spawn(async move {
                    let event = falco_event(C2, &format!("ns-{i}"), &format!("pod-{i}"));
                    if responder.handle(&event).await == Outcome::Labeled {
                        labeled.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap();
        }

        assert_eq!(labeled.load(Ordering::SeqCst), N);

        let calls = labeler.calls.lock().unwrap();
        assert_eq!(calls.len(), N);
        let pairs: HashSet<(String, String)> = calls
            .iter()
            .map(|m| (m.namespace.clone(), m.pod.clone()))
            .collect();
        assert_eq!(pairs.len(), N);
        for mutation in calls.iter() {
            let suffix = mutation.namespace.trim_start_matches("ns-");
            assert_eq!(mutation.pod, format!("pod-{suffix}"));
        }
    }
}
