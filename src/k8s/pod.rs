//! Pod watcher and classification rules.

use crate::fault::{FaultKind, FaultReason, RawFault};
use crate::k8s::{apis_for, watch};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn one pod watcher per monitored namespace.
pub fn spawn_watchers(
    client: &Client,
    namespaces: &[String],
    resync: Duration,
    faults: mpsc::Sender<RawFault>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    apis_for::<Pod>(client, namespaces)
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

/// Classify an observed pod; at most one fault per observation.
///
/// Container and init container statuses are checked with the same rules;
/// the phase check runs last so a specific container reason wins over the
/// generic `PodFailed`.
pub(crate) fn classify(pod: &Pod) -> Option<RawFault> {
    let name = pod.metadata.name.as_deref()?;
    let namespace = pod.metadata.namespace.as_deref()?;
    let status = pod.status.as_ref()?;

    let phase = status.phase.as_deref().unwrap_or("");
    if phase == "Succeeded" {
        return None;
    }

    let containers = status
        .container_statuses
        .iter()
        .flatten()
        .chain(status.init_container_statuses.iter().flatten());

    for container in containers {
        if let Some(fault) = classify_container(namespace, name, container) {
            return Some(fault);
        }
    }

    if phase == "Failed" {
        let message = status
            .message
            .clone()
            .unwrap_or_else(|| "pod phase is Failed".to_string());
        return Some(RawFault::new(
            FaultKind::Pod,
            namespace,
            name,
            FaultReason::PodFailed,
            message,
        ));
    }

    None
}

fn classify_container(
    namespace: &str,
    pod_name: &str,
    container: &ContainerStatus,
) -> Option<RawFault> {
    let state = container.state.as_ref()?;

    if let Some(waiting) = &state.waiting {
        if let Some(reason) = waiting.reason.as_deref() {
            let fault_reason = match reason {
                "CrashLoopBackOff" => Some(FaultReason::CrashLoopBackOff),
                "ImagePullBackOff" => Some(FaultReason::ImagePullBackOff),
                "ErrImagePull" => Some(FaultReason::ErrImagePull),
                "CreateContainerConfigError" => Some(FaultReason::CreateContainerConfigError),
                "RunContainerError" => Some(FaultReason::RunContainerError),
                _ => None,
            };
            if let Some(fault_reason) = fault_reason {
                let message = waiting
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("container {} waiting: {reason}", container.name));
                return Some(RawFault::new(
                    FaultKind::Pod,
                    namespace,
                    pod_name,
                    fault_reason,
                    message,
                ));
            }
        }
    }

    if let Some(terminated) = &state.terminated {
        if terminated.reason.as_deref() == Some("OOMKilled") {
            return Some(RawFault::new(
                FaultKind::Pod,
                namespace,
                pod_name,
                FaultReason::OomKilled,
                format!(
                    "container {} exit code: {}",
                    container.name, terminated.exit_code
                ),
            ));
        }
        if terminated.exit_code != 0 {
            return Some(RawFault::new(
                FaultKind::Pod,
                namespace,
                pod_name,
                FaultReason::ContainerError,
                format!(
                    "container {} exit code: {}",
                    container.name, terminated.exit_code
                ),
            ));
        }
    }

    None
}
