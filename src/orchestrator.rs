//! Per-fault remediation state machine.
//!
//! For each fault from the detector: gate on retry accounting, snapshot the
//! resource, account the attempt, build the diagnostic brief, invoke the
//! agent, and notify. Exhausted resources go to rollback (Deployments) and
//! escalation instead. Every fault is handled in its own task so a slow
//! agent call never blocks queue drainage.

use crate::agent::RemediationAgent;
use crate::context::ContextGenerator;
use crate::fault::{Fault, FaultKind};
use crate::notify::EscalationService;
use crate::retry::{RetryGate, RetryManager};
use crate::rollback::RollbackService;
use crate::snapshot::SnapshotService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub struct Orchestrator {
    retry: Arc<RetryManager>,
    snapshots: Arc<SnapshotService>,
    rollback: Arc<RollbackService>,
    context: Arc<ContextGenerator>,
    agent: Arc<dyn RemediationAgent>,
    escalation: Arc<EscalationService>,
    rollback_enabled: bool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        retry: Arc<RetryManager>,
        snapshots: Arc<SnapshotService>,
        rollback: Arc<RollbackService>,
        context: Arc<ContextGenerator>,
        agent: Arc<dyn RemediationAgent>,
        escalation: Arc<EscalationService>,
        rollback_enabled: bool,
    ) -> Self {
        Self {
            retry,
            snapshots,
            rollback,
            context,
            agent,
            escalation,
            rollback_enabled,
        }
    }

    /// Drain the fault channel until shutdown. In-flight handlers are left
    /// to finish on their own; only new spawns stop.
    pub async fn run(
        self: Arc<Self>,
        mut faults: mpsc::Receiver<Fault>,
        shutdown: CancellationToken,
    ) {
        info!("orchestrator started, waiting for faults");
        loop {
            let fault = tokio::select! {
                () = shutdown.cancelled() => break,
                fault = faults.recv() => fault,
            };
            let Some(fault) = fault else { break };
            let orchestrator = Arc::clone(&self);
            tokio::spawn(async move {
                orchestrator.handle_fault(fault).await;
            });
        }
        info!("orchestrator stopped");
    }

    #[instrument(skip(self, fault), fields(resource = %fault.resource_id(), reason = %fault.reason))]
    pub async fn handle_fault(&self, fault: Fault) {
        let resource_id = fault.resource_id();

        match self.retry.evaluate(&resource_id) {
            RetryGate::Exhausted { attempts } => {
                self.escalate_exhausted(&fault, attempts).await;
                return;
            }
            RetryGate::Backoff { remaining } => {
                self.escalate_backoff(&fault, remaining).await;
                return;
            }
            RetryGate::Ready => {}
        }

        // Best effort: without a snapshot the agent runs without a rollback
        // safety net, and a later rollback reports "no snapshot".
        if let Err(err) = self
            .snapshots
            .capture(fault.kind, &fault.namespace, &fault.name)
            .await
        {
            warn!(error = %err, "failed to capture snapshot, continuing");
        }

        let attempt = self.retry.increment(&resource_id);
        info!(attempt, "starting remediation attempt");

        let brief = self.context.generate(&fault).await;

        let summary = match self.agent.run(&brief).await {
            Ok(summary) => summary,
            Err(err) => {
                // The attempt is already counted; the next observation
                // re-enters the pipeline subject to backoff.
                error!(error = %err, "agent invocation failed");
                return;
            }
        };

        info!("remediation attempt completed");
        self.escalation.notify_success(&fault, &summary).await;
    }

    /// Compose the escalation reason from the exhausted attempt count and
    /// the rollback outcome, then alert the operator. Counters stay put:
    /// recovery is a human decision from here on.
    async fn escalate_exhausted(&self, fault: &Fault, attempts: u32) {
        warn!(attempts, "max retries exceeded, escalating");

        let mut reason = format!("Max retries ({attempts}) exceeded.");

        if fault.kind != FaultKind::Deployment {
            reason.push_str(" Rollback skipped: unsupported kind.");
        } else if !self.rollback_enabled {
            reason.push_str(" Rollback disabled.");
        } else {
            match self
                .rollback
                .perform(fault.kind, &fault.namespace, &fault.name)
                .await
            {
                Ok(()) => reason.push_str(" Rollback performed successfully."),
                Err(err) => {
                    warn!(error = %err, "rollback failed");
                    reason.push_str(&format!(" Rollback failed: {err}."));
                }
            }
        }

        self.escalation.notify_failure(fault, &reason).await;
    }

    /// A fault arrived inside the backoff interval: no attempt runs, but the
    /// operator is still alerted. Rollback stays out of it, retries are not
    /// exhausted yet.
    async fn escalate_backoff(&self, fault: &Fault, remaining: Duration) {
        let attempts = self.retry.attempt_count(&fault.resource_id());
        info!(
            attempts,
            remaining_secs = remaining.as_secs(),
            "inside retry backoff, escalating without an attempt"
        );

        let reason = format!(
            "Retry backoff in effect after {attempts} attempt(s); next attempt allowed in {}s. \
             Rollback skipped: retries not exhausted.",
            remaining.as_secs().max(1)
        );
        self.escalation.notify_failure(fault, &reason).await;
    }
}
