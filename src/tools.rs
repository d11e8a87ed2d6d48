//! Tool facade: the audited surface the remediation agent may call.
//!
//! Exactly five tools are agent-visible; each validates its inputs and
//! performs one cluster operation. The selector-based workload log helpers
//! are internal to the diagnostic brief and are not exposed to the agent.
//! There is deliberately no rollback tool here.

use crate::cluster::{ClusterError, ClusterOps, PatchStrategy};
use crate::fault::FaultKind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Default log tail when the caller does not specify one.
pub const DEFAULT_LOG_TAIL: i64 = 50;
const MAX_LOG_TAIL: i64 = 500;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub struct ToolFacade {
    cluster: Arc<dyn ClusterOps>,
}

impl ToolFacade {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterOps>) -> Self {
        Self { cluster }
    }

    /// Names of the agent-callable tools, in declaration order.
    #[must_use]
    pub const fn tool_names() -> [&'static str; 5] {
        [
            "get_pod_logs",
            "describe_resource",
            "patch_deployment",
            "scale_deployment",
            "delete_pod",
        ]
    }

    pub async fn get_pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail: Option<i64>,
    ) -> Result<String, ToolError> {
        require_name("namespace", namespace)?;
        require_name("name", name)?;
        let tail = tail.unwrap_or(DEFAULT_LOG_TAIL);
        if !(1..=MAX_LOG_TAIL).contains(&tail) {
            return Err(ToolError::InvalidArgument(format!(
                "tail must be between 1 and {MAX_LOG_TAIL}, got {tail}"
            )));
        }
        Ok(self.cluster.pod_logs(namespace, name, tail).await?)
    }

    /// Condensed human-readable status for a Pod, Deployment, or Job.
    pub async fn describe_resource(
        &self,
        kind: FaultKind,
        name: &str,
        namespace: &str,
    ) -> Result<String, ToolError> {
        require_name("namespace", namespace)?;
        require_name("name", name)?;
        match kind {
            FaultKind::Pod => {
                let pod = self.cluster.get_pod(namespace, name).await?;
                Ok(describe_pod(&pod))
            }
            FaultKind::Deployment => {
                let deployment = self.cluster.get_deployment(namespace, name).await?;
                Ok(describe_deployment(&deployment))
            }
            FaultKind::Job => {
                let job = self.cluster.get_job(namespace, name).await?;
                Ok(describe_job(&job))
            }
        }
    }

    pub async fn patch_deployment(
        &self,
        name: &str,
        namespace: &str,
        strategy: PatchStrategy,
        data: Value,
    ) -> Result<String, ToolError> {
        require_name("namespace", namespace)?;
        require_name("name", name)?;
        match (strategy, &data) {
            (PatchStrategy::Json, Value::Array(_))
            | (PatchStrategy::Strategic | PatchStrategy::Merge, Value::Object(_)) => {}
            (PatchStrategy::Json, _) => {
                return Err(ToolError::InvalidArgument(
                    "json patch data must be an array of operations".to_string(),
                ))
            }
            _ => {
                return Err(ToolError::InvalidArgument(
                    "patch data must be a JSON object".to_string(),
                ))
            }
        }

        self.cluster
            .patch_deployment(namespace, name, strategy, data)
            .await?;
        info!(namespace, name, %strategy, "patched deployment");
        Ok(format!(
            "Applied {strategy} patch to deployment {namespace}/{name}"
        ))
    }

    pub async fn scale_deployment(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<String, ToolError> {
        require_name("namespace", namespace)?;
        require_name("name", name)?;
        if replicas < 0 {
            return Err(ToolError::InvalidArgument(format!(
                "replicas must be non-negative, got {replicas}"
            )));
        }
        self.cluster
            .scale_deployment(namespace, name, replicas)
            .await?;
        info!(namespace, name, replicas, "scaled deployment");
        Ok(format!(
            "Scaled deployment {namespace}/{name} to {replicas} replicas"
        ))
    }

    /// Delete a pod; its owning controller recreates it.
    pub async fn delete_pod(&self, name: &str, namespace: &str) -> Result<String, ToolError> {
        require_name("namespace", namespace)?;
        require_name("name", name)?;
        self.cluster.delete_pod(namespace, name).await?;
        info!(namespace, name, "deleted pod");
        Ok(format!("Deleted pod {namespace}/{name}"))
    }

    /// Dispatch a named tool call with JSON arguments (agent entry point).
    pub async fn invoke(&self, tool: &str, args: &Value) -> Result<String, ToolError> {
        match tool {
            "get_pod_logs" => {
                let namespace = require_str(args, "namespace")?;
                let name = require_str(args, "name")?;
                let tail = optional_i64(args, "tail")?;
                self.get_pod_logs(&namespace, &name, tail).await
            }
            "describe_resource" => {
                let kind: FaultKind = require_str(args, "kind")?
                    .parse()
                    .map_err(ToolError::InvalidArgument)?;
                let name = require_str(args, "name")?;
                let namespace = require_str(args, "namespace")?;
                self.describe_resource(kind, &name, &namespace).await
            }
            "patch_deployment" => {
                let name = require_str(args, "name")?;
                let namespace = require_str(args, "namespace")?;
                let strategy = match args.get("type") {
                    Some(Value::String(s)) => {
                        s.parse().map_err(ToolError::InvalidArgument)?
                    }
                    None | Some(Value::Null) => PatchStrategy::default(),
                    Some(other) => {
                        return Err(ToolError::InvalidArgument(format!(
                            "type must be a string, got {other}"
                        )))
                    }
                };
                let data = args
                    .get("data")
                    .cloned()
                    .ok_or_else(|| ToolError::InvalidArgument("missing field: data".to_string()))?;
                // Tolerate the model sending the patch as an escaped string.
                let data = match data {
                    Value::String(raw) => serde_json::from_str(&raw).map_err(|e| {
                        ToolError::InvalidArgument(format!("data is not valid JSON: {e}"))
                    })?,
                    other => other,
                };
                self.patch_deployment(&name, &namespace, strategy, data).await
            }
            "scale_deployment" => {
                let name = require_str(args, "name")?;
                let namespace = require_str(args, "namespace")?;
                let replicas = args
                    .get("replicas")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        ToolError::InvalidArgument("missing integer field: replicas".to_string())
                    })?;
                let replicas = i32::try_from(replicas).map_err(|_| {
                    ToolError::InvalidArgument(format!("replicas out of range: {replicas}"))
                })?;
                self.scale_deployment(&name, &namespace, replicas).await
            }
            "delete_pod" => {
                let name = require_str(args, "name")?;
                let namespace = require_str(args, "namespace")?;
                self.delete_pod(&name, &namespace).await
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Logs of the first pod backing a Deployment or Job, resolved through
    /// the workload's label selector. Internal: feeds the diagnostic brief.
    pub(crate) async fn workload_logs(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
        tail: i64,
    ) -> Result<String, ToolError> {
        let selector = match kind {
            FaultKind::Pod => return self.get_pod_logs(namespace, name, Some(tail)).await,
            FaultKind::Deployment => {
                let deployment = self.cluster.get_deployment(namespace, name).await?;
                deployment
                    .spec
                    .map(|s| s.selector)
                    .and_then(|s| selector_string(&s))
            }
            FaultKind::Job => {
                let job = self.cluster.get_job(namespace, name).await?;
                job.spec
                    .and_then(|s| s.selector)
                    .and_then(|s| selector_string(&s))
            }
        };

        let Some(selector) = selector else {
            return Ok(format!("No label selector on {kind} {namespace}/{name}"));
        };

        let pods = self.cluster.pods_by_selector(namespace, &selector).await?;
        let Some(pod_name) = pods
            .first()
            .and_then(|p| p.metadata.name.as_deref())
        else {
            return Ok(format!("No pods found for {kind} {namespace}/{name}"));
        };

        self.get_pod_logs(namespace, pod_name, Some(tail)).await
    }
}

fn require_name(field: &str, value: &str) -> Result<(), ToolError> {
    if value.is_empty() {
        return Err(ToolError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

fn require_str(args: &Value, field: &str) -> Result<String, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArgument(format!("missing field: {field}")))
}

fn optional_i64(args: &Value, field: &str) -> Result<Option<i64>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            ToolError::InvalidArgument(format!("{field} must be an integer"))
        }),
    }
}

fn selector_string(selector: &LabelSelector) -> Option<String> {
    let labels = selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn describe_pod(pod: &Pod) -> String {
    let mut out = String::new();
    let name = pod.metadata.name.as_deref().unwrap_or("<unknown>");
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("<unknown>");
    let _ = writeln!(out, "Pod: {namespace}/{name}");

    if let Some(status) = &pod.status {
        let _ = writeln!(out, "Phase: {}", status.phase.as_deref().unwrap_or("Unknown"));
        if let Some(reason) = &status.reason {
            let _ = writeln!(out, "Reason: {reason}");
        }
        if let Some(message) = &status.message {
            let _ = writeln!(out, "Message: {message}");
        }
        for container in status.container_statuses.iter().flatten() {
            let state = container.state.as_ref().map_or_else(
                || "unknown".to_string(),
                |state| {
                    if let Some(waiting) = &state.waiting {
                        format!("Waiting ({})", waiting.reason.as_deref().unwrap_or("?"))
                    } else if let Some(terminated) = &state.terminated {
                        format!(
                            "Terminated ({}, exit code {})",
                            terminated.reason.as_deref().unwrap_or("?"),
                            terminated.exit_code
                        )
                    } else {
                        "Running".to_string()
                    }
                },
            );
            let _ = writeln!(
                out,
                "Container {}: {state}, restarts: {}",
                container.name, container.restart_count
            );
        }
        for condition in status.conditions.iter().flatten() {
            let _ = writeln!(out, "Condition {}: {}", condition.type_, condition.status);
        }
    } else {
        let _ = writeln!(out, "Phase: Unknown");
    }

    out
}

fn describe_deployment(deployment: &Deployment) -> String {
    let mut out = String::new();
    let name = deployment.metadata.name.as_deref().unwrap_or("<unknown>");
    let namespace = deployment.metadata.namespace.as_deref().unwrap_or("<unknown>");
    let _ = writeln!(out, "Deployment: {namespace}/{name}");

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let _ = writeln!(out, "Desired replicas: {desired}");

    if let Some(status) = &deployment.status {
        let _ = writeln!(
            out,
            "Replicas: {} total, {} ready, {} available, {} updated",
            status.replicas.unwrap_or(0),
            status.ready_replicas.unwrap_or(0),
            status.available_replicas.unwrap_or(0),
            status.updated_replicas.unwrap_or(0)
        );
        for condition in status.conditions.iter().flatten() {
            let _ = writeln!(
                out,
                "Condition {}: {} ({}: {})",
                condition.type_,
                condition.status,
                condition.reason.as_deref().unwrap_or("-"),
                condition.message.as_deref().unwrap_or("-")
            );
        }
    }

    out
}

fn describe_job(job: &Job) -> String {
    let mut out = String::new();
    let name = job.metadata.name.as_deref().unwrap_or("<unknown>");
    let namespace = job.metadata.namespace.as_deref().unwrap_or("<unknown>");
    let _ = writeln!(out, "Job: {namespace}/{name}");

    if let Some(backoff_limit) = job.spec.as_ref().and_then(|s| s.backoff_limit) {
        let _ = writeln!(out, "Backoff limit: {backoff_limit}");
    }
    if let Some(status) = &job.status {
        let _ = writeln!(
            out,
            "Pods: {} active, {} succeeded, {} failed",
            status.active.unwrap_or(0),
            status.succeeded.unwrap_or(0),
            status.failed.unwrap_or(0)
        );
        for condition in status.conditions.iter().flatten() {
            let _ = writeln!(
                out,
                "Condition {}: {} ({})",
                condition.type_,
                condition.status,
                condition.reason.as_deref().unwrap_or("-")
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        deployment_with_replicas, failing_pod, job_with_backoff, FakeCluster,
    };
    use serde_json::json;

    fn facade(cluster: Arc<FakeCluster>) -> ToolFacade {
        ToolFacade::new(cluster)
    }

    #[tokio::test]
    async fn get_pod_logs_defaults_tail_to_fifty() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_logs("default", "api-7", "line1\nline2");

        let facade = facade(cluster.clone());
        let logs = facade.get_pod_logs("default", "api-7", None).await.expect("logs");
        assert_eq!(logs, "line1\nline2");
        assert!(cluster
            .operations()
            .iter()
            .any(|op| op == "pod_logs default/api-7 tail=50"));
    }

    #[tokio::test]
    async fn tail_bounds_are_validated() {
        let cluster = Arc::new(FakeCluster::new());
        let facade = facade(cluster);
        let err = facade
            .get_pod_logs("default", "api-7", Some(0))
            .await
            .expect_err("invalid tail");
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn describe_deployment_includes_replicas_and_conditions() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_deployment(
            "prod",
            "web",
            deployment_with_replicas("prod", "web", 3),
        );

        let facade = facade(cluster);
        let description = facade
            .describe_resource(FaultKind::Deployment, "web", "prod")
            .await
            .expect("describe");
        assert!(description.contains("Deployment: prod/web"));
        assert!(description.contains("Desired replicas: 3"));
    }

    #[tokio::test]
    async fn describe_pod_reports_container_states() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_pod("default", "api-7", failing_pod("default", "api-7"));

        let facade = facade(cluster);
        let description = facade
            .describe_resource(FaultKind::Pod, "api-7", "default")
            .await
            .expect("describe");
        assert!(description.contains("Pod: default/api-7"));
        assert!(description.contains("Waiting (CrashLoopBackOff)"));
    }

    #[tokio::test]
    async fn describe_job_reports_counters() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_job("batch", "etl-42", job_with_backoff("batch", "etl-42", 3, 3));

        let facade = facade(cluster);
        let description = facade
            .describe_resource(FaultKind::Job, "etl-42", "batch")
            .await
            .expect("describe");
        assert!(description.contains("Job: batch/etl-42"));
        assert!(description.contains("3 failed"));
    }

    #[tokio::test]
    async fn scale_rejects_negative_replicas() {
        let cluster = Arc::new(FakeCluster::new());
        let facade = facade(cluster.clone());
        let err = facade
            .scale_deployment("web", "prod", -1)
            .await
            .expect_err("negative");
        assert!(matches!(err, ToolError::InvalidArgument(_)));
        assert!(cluster.operations().is_empty());
    }

    #[tokio::test]
    async fn patch_rejects_non_object_data() {
        let cluster = Arc::new(FakeCluster::new());
        let facade = facade(cluster);
        let err = facade
            .patch_deployment("web", "prod", PatchStrategy::Strategic, json!("not an object"))
            .await
            .expect_err("invalid data");
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn invoke_dispatches_to_the_named_tool() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_deployment("prod", "web", deployment_with_replicas("prod", "web", 3));

        let facade = facade(cluster.clone());
        let result = facade
            .invoke(
                "scale_deployment",
                &json!({ "name": "web", "namespace": "prod", "replicas": 0 }),
            )
            .await
            .expect("scale");
        assert_eq!(result, "Scaled deployment prod/web to 0 replicas");
        assert!(cluster
            .operations()
            .iter()
            .any(|op| op == "scale_deployment prod/web replicas=0"));
    }

    #[tokio::test]
    async fn invoke_rejects_unknown_tools() {
        let cluster = Arc::new(FakeCluster::new());
        let facade = facade(cluster);
        let err = facade
            .invoke("rollback_deployment", &json!({}))
            .await
            .expect_err("not exposed");
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn invoke_patch_defaults_to_strategic_and_accepts_string_data() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_deployment("prod", "web", deployment_with_replicas("prod", "web", 3));

        let facade = facade(cluster.clone());
        let result = facade
            .invoke(
                "patch_deployment",
                &json!({
                    "name": "web",
                    "namespace": "prod",
                    "data": "{\"spec\":{\"replicas\":2}}"
                }),
            )
            .await
            .expect("patch");
        assert!(result.contains("strategic"));
        assert!(cluster
            .operations()
            .iter()
            .any(|op| op == "patch_deployment prod/web strategy=strategic"));
    }

    #[tokio::test]
    async fn workload_logs_resolve_through_the_selector() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_deployment("prod", "web", deployment_with_replicas("prod", "web", 3));
        cluster.put_pod("prod", "web-abc12", failing_pod("prod", "web-abc12"));
        cluster.put_logs("prod", "web-abc12", "panic: boom");

        let facade = facade(cluster);
        let logs = facade
            .workload_logs(FaultKind::Deployment, "prod", "web", 50)
            .await
            .expect("logs");
        assert_eq!(logs, "panic: boom");
    }

    #[tokio::test]
    async fn workload_logs_report_when_no_pods_match() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.put_deployment("prod", "web", deployment_with_replicas("prod", "web", 3));

        let facade = facade(cluster);
        let logs = facade
            .workload_logs(FaultKind::Deployment, "prod", "web", 50)
            .await
            .expect("message");
        assert!(logs.contains("No pods found"));
    }
}
