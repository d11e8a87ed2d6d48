//! Job watcher and classification rules.

use crate::fault::{FaultKind, FaultReason, RawFault};
use crate::k8s::{apis_for, watch};
use k8s_openapi::api::batch::v1::Job;
use kube::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn one job watcher per monitored namespace.
pub fn spawn_watchers(
    client: &Client,
    namespaces: &[String],
    resync: Duration,
    faults: mpsc::Sender<RawFault>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    apis_for::<Job>(client, namespaces)
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

pub(crate) fn classify(job: &Job) -> Option<RawFault> {
    let name = job.metadata.name.as_deref()?;
    let namespace = job.metadata.namespace.as_deref()?;
    let status = job.status.as_ref()?;

    for condition in status.conditions.iter().flatten() {
        if condition.type_ == "Failed" && condition.status == "True" {
            let reason = condition.reason.as_deref().unwrap_or("");
            let detail = condition.message.as_deref().unwrap_or("");
            return Some(RawFault::new(
                FaultKind::Job,
                namespace,
                name,
                FaultReason::JobFailed,
                format!("Job failed. Reason: {reason} - {detail}"),
            ));
        }
    }

    // The rule only fires when a backoff limit is actually set.
    if let Some(backoff_limit) = job.spec.as_ref().and_then(|s| s.backoff_limit) {
        let failed = status.failed.unwrap_or(0);
        if failed >= backoff_limit {
            return Some(RawFault::new(
                FaultKind::Job,
                namespace,
                name,
                FaultReason::JobBackoffLimitExceeded,
                format!("Failed retries ({failed}) exceeded backoff limit ({backoff_limit})"),
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn job(spec: Option<JobSpec>, status: JobStatus) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("etl-42".to_string()),
                namespace: Some("batch".to_string()),
                ..ObjectMeta::default()
            },
            spec,
            status: Some(status),
        }
    }

    #[test]
    fn failed_condition_is_detected() {
        let job = job(
            None,
            JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Failed".to_string(),
                    status: "True".to_string(),
                    reason: Some("BackoffLimitExceeded".to_string()),
                    message: Some("too many failures".to_string()),
                    ..JobCondition::default()
                }]),
                ..JobStatus::default()
            },
        );

        let fault = classify(&job).expect("fault");
        assert_eq!(fault.reason, FaultReason::JobFailed);
        assert!(fault.message.contains("too many failures"));
    }

    #[test]
    fn backoff_limit_reached_is_detected() {
        let job = job(
            Some(JobSpec {
                backoff_limit: Some(3),
                ..JobSpec::default()
            }),
            JobStatus {
                failed: Some(3),
                ..JobStatus::default()
            },
        );

        let fault = classify(&job).expect("fault");
        assert_eq!(fault.reason, FaultReason::JobBackoffLimitExceeded);
        assert!(fault.message.contains("(3)"));
    }

    #[test]
    fn backoff_rule_does_not_fire_without_limit() {
        let job = job(
            Some(JobSpec::default()),
            JobStatus {
                failed: Some(10),
                ..JobStatus::default()
            },
        );
        assert!(classify(&job).is_none());
    }

    #[test]
    fn running_job_emits_nothing() {
        let job = job(
            Some(JobSpec {
                backoff_limit: Some(6),
                ..JobSpec::default()
            }),
            JobStatus {
                active: Some(1),
                failed: Some(1),
                ..JobStatus::default()
            },
        );
        assert!(classify(&job).is_none());
    }
}
