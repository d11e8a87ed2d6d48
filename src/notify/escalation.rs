//! Escalation rendering and dispatch.
//!
//! Transport failures are logged and swallowed; a lost email must never
//! poison orchestrator state.

use crate::fault::Fault;
use crate::notify::Mailer;
use std::sync::Arc;
use tracing::{error, info};

pub struct EscalationService {
    mailer: Arc<dyn Mailer>,
    recipient: String,
}

impl EscalationService {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, recipient: impl Into<String>) -> Self {
        Self {
            mailer,
            recipient: recipient.into(),
        }
    }

    /// Informational report after a completed remediation attempt. "Success"
    /// means the attempt ran to completion, not that the cluster recovered.
    pub async fn notify_success(&self, fault: &Fault, summary: &str) {
        let (subject, body) = render_success(fault, summary);
        self.dispatch(&subject, &body).await;
    }

    /// Action-required alert: autonomous repair is over for this resource.
    pub async fn notify_failure(&self, fault: &Fault, reason: &str) {
        let (subject, body) = render_failure(fault, reason);
        self.dispatch(&subject, &body).await;
    }

    async fn dispatch(&self, subject: &str, body: &str) {
        match self.mailer.send(&self.recipient, subject, body).await {
            Ok(()) => info!(subject, "escalation notification sent"),
            Err(err) => error!(subject, error = %err, "failed to send escalation notification"),
        }
    }
}

pub(crate) fn render_success(fault: &Fault, summary: &str) -> (String, String) {
    let subject = format!(
        "AMOS: RESOLVED - {} {}/{}",
        fault.kind, fault.namespace, fault.name
    );
    let body = format!(
        "<h2>Fault Resolved</h2>\n\
         <p><strong>Resource:</strong> {}/{}</p>\n\
         <p><strong>Issue:</strong> {}</p>\n\
         <hr>\n\
         <h3>Agent Summary</h3>\n\
         <p>{}</p>\n\
         <p><em>Please review the changes in the cluster.</em></p>",
        fault.namespace, fault.name, fault.reason, summary
    );
    (subject, body)
}

pub(crate) fn render_failure(fault: &Fault, reason: &str) -> (String, String) {
    let subject = format!(
        "AMOS: ALERT - Failed to Resolve {} {}/{}",
        fault.kind, fault.namespace, fault.name
    );
    let body = format!(
        "<h2 style=\"color: red;\">Intervention Required</h2>\n\
         <p><strong>Resource:</strong> {}/{}</p>\n\
         <p><strong>Issue:</strong> {}</p>\n\
         <p><strong>Status:</strong> {}</p>\n\
         <hr>\n\
         <p>AMOS could not autonomously fix this issue. \
         <strong>Please investigate immediately.</strong></p>",
        fault.namespace, fault.name, fault.reason, reason
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultKind, FaultReason, RawFault};
    use crate::testutil::FakeMailer;

    fn deployment_fault() -> Fault {
        Fault::from_raw(RawFault::new(
            FaultKind::Deployment,
            "prod",
            "web",
            FaultReason::DeploymentStuck,
            "ProgressDeadlineExceeded",
        ))
    }

    #[test]
    fn success_rendering_names_the_resource() {
        let (subject, body) = render_success(&deployment_fault(), "Scaled replicas back up.");
        assert_eq!(subject, "AMOS: RESOLVED - Deployment prod/web");
        assert!(body.contains("prod/web"));
        assert!(body.contains("DeploymentStuck"));
        assert!(body.contains("Scaled replicas back up."));
    }

    #[test]
    fn failure_rendering_carries_the_reason_verbatim() {
        let (subject, body) = render_failure(
            &deployment_fault(),
            "Max retries (2) exceeded. Rollback performed successfully.",
        );
        assert_eq!(subject, "AMOS: ALERT - Failed to Resolve Deployment prod/web");
        assert!(body.contains("Max retries (2) exceeded. Rollback performed successfully."));
        assert!(body.contains("Intervention Required"));
    }

    #[tokio::test]
    async fn notifications_go_to_the_configured_recipient() {
        let mailer = Arc::new(FakeMailer::new());
        let service = EscalationService::new(mailer.clone(), "oncall@example.com");

        service.notify_success(&deployment_fault(), "done").await;

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "oncall@example.com");
        assert!(sent[0].1.starts_with("AMOS: RESOLVED"));
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed() {
        let mailer = Arc::new(FakeMailer::failing());
        let service = EscalationService::new(mailer, "oncall@example.com");

        // Must not panic or propagate.
        service.notify_failure(&deployment_fault(), "reason").await;
    }
}
