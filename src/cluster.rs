//! Cluster capability boundary.
//!
//! `ClusterOps` is the complete set of cluster operations the core consumes
//! outside the watch streams. The tool facade, snapshot, and rollback
//! services all go through it, which keeps the agent away from raw
//! credentials and lets tests substitute an in-memory cluster.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors crossing the cluster boundary.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("cluster API error: {0}")]
    Api(String),
    #[error("invalid patch body: {0}")]
    InvalidPatch(String),
}

/// Patch flavors accepted for Deployment patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchStrategy {
    #[default]
    Strategic,
    Merge,
    Json,
}

impl fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Strategic => "strategic",
            Self::Merge => "merge",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

impl FromStr for PatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "strategic" => Ok(Self::Strategic),
            "merge" => Ok(Self::Merge),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown patch type '{other}' (expected strategic, merge, or json)"
            )),
        }
    }
}

/// The narrow cluster surface the core depends on.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;

    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, ClusterError>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError>;

    /// Replace the deployment object wholesale (used by rollback).
    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: Deployment,
    ) -> Result<(), ClusterError>;

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        strategy: PatchStrategy,
        body: Value,
    ) -> Result<(), ClusterError>;

    /// Set the desired replica count via the scale subresource.
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Fetch the tail of a pod's logs.
    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError>;

    /// List pods matching a label selector (used to resolve workload logs).
    async fn pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, ClusterError>;
}

/// Production implementation over a `kube::Client`.
pub struct KubeClusterOps {
    client: Client,
}

impl KubeClusterOps {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_err(
    err: kube::Error,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_err(e, "Pod", namespace, name))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_err(e, "Deployment", namespace, name))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        self.jobs(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_err(e, "Job", namespace, name))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: Deployment,
    ) -> Result<(), ClusterError> {
        self.deployments(namespace)
            .replace(name, &PostParams::default(), &deployment)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_err(e, "Deployment", namespace, name))
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        strategy: PatchStrategy,
        body: Value,
    ) -> Result<(), ClusterError> {
        let api = self.deployments(namespace);
        let params = PatchParams::default();
        let result = match strategy {
            PatchStrategy::Strategic => api.patch(name, &params, &Patch::Strategic(body)).await,
            PatchStrategy::Merge => api.patch(name, &params, &Patch::Merge(body)).await,
            PatchStrategy::Json => {
                let patch: json_patch::Patch = serde_json::from_value(body)
                    .map_err(|e| ClusterError::InvalidPatch(e.to_string()))?;
                api.patch(name, &params, &Patch::Json::<Value>(patch)).await
            }
        };
        result
            .map(|_| ())
            .map_err(|e| map_kube_err(e, "Deployment", namespace, name))
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let body = json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(body))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_err(e, "Deployment", namespace, name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_err(e, "Pod", namespace, name))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError> {
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        self.pods(namespace)
            .logs(name, &params)
            .await
            .map_err(|e| map_kube_err(e, "Pod", namespace, name))
    }

    async fn pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().labels(selector);
        self.pods(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::Api(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_strategy_parses_with_strategic_default() {
        assert_eq!("".parse::<PatchStrategy>(), Ok(PatchStrategy::Strategic));
        assert_eq!(
            "strategic".parse::<PatchStrategy>(),
            Ok(PatchStrategy::Strategic)
        );
        assert_eq!("MERGE".parse::<PatchStrategy>(), Ok(PatchStrategy::Merge));
        assert_eq!("json".parse::<PatchStrategy>(), Ok(PatchStrategy::Json));
        assert!("jsonnet".parse::<PatchStrategy>().is_err());
    }

    #[test]
    fn not_found_error_names_the_resource() {
        let err = ClusterError::NotFound {
            kind: "Deployment",
            namespace: "prod".into(),
            name: "web".into(),
        };
        assert_eq!(err.to_string(), "Deployment prod/web not found");
    }
}
