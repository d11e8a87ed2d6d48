//! Deployment watcher and classification rules.

use crate::fault::{FaultKind, FaultReason, RawFault};
use crate::k8s::{apis_for, watch};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn one deployment watcher per monitored namespace.
pub fn spawn_watchers(
    client: &Client,
    namespaces: &[String],
    resync: Duration,
    faults: mpsc::Sender<RawFault>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    apis_for::<Deployment>(client, namespaces)
        .into_iter()
        .map(|api| {
            tokio::spawn(watch::run_watch(
                api,
                resync,
                classify,
                faults.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

/// Walk the status conditions; the first matching condition wins.
pub(crate) fn classify(deployment: &Deployment) -> Option<RawFault> {
    let name = deployment.metadata.name.as_deref()?;
    let namespace = deployment.metadata.namespace.as_deref()?;
    let status = deployment.status.as_ref()?;

    for condition in status.conditions.iter().flatten() {
        let reason = condition.reason.as_deref().unwrap_or("");
        let detail = condition.message.as_deref().unwrap_or("");

        if condition.type_ == "Available" && condition.status == "False" {
            return Some(RawFault::new(
                FaultKind::Deployment,
                namespace,
                name,
                FaultReason::DeploymentUnavailable,
                format!("Deployment available: False. Reason: {reason} - {detail}"),
            ));
        }

        if condition.type_ == "Progressing" && condition.status == "False" {
            return Some(RawFault::new(
                FaultKind::Deployment,
                namespace,
                name,
                FaultReason::DeploymentStuck,
                format!("Deployment progressing: False. Reason: {reason} - {detail}"),
            ));
        }
    }

    None
}
