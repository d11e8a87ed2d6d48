//! Shared test fixtures: an in-memory cluster, a recording mailer, and a
//! scriptable agent.

use crate::agent::{AgentError, RemediationAgent};
use crate::cluster::{ClusterError, ClusterOps, PatchStrategy};
use crate::notify::{MailError, Mailer};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

type Key = (String, String);

/// In-memory stand-in for the cluster, recording every operation.
#[derive(Default)]
pub(crate) struct FakeCluster {
    pods: Mutex<HashMap<Key, Pod>>,
    deployments: Mutex<HashMap<Key, Deployment>>,
    jobs: Mutex<HashMap<Key, Job>>,
    logs: Mutex<HashMap<Key, String>>,
    operations: Mutex<Vec<String>>,
    replace_failure: Mutex<Option<String>>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_pod(&self, namespace: &str, name: &str, pod: Pod) {
        self.pods
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), pod);
    }

    pub(crate) fn put_deployment(&self, namespace: &str, name: &str, deployment: Deployment) {
        self.deployments
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), deployment);
    }

    pub(crate) fn put_job(&self, namespace: &str, name: &str, job: Job) {
        self.jobs
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), job);
    }

    pub(crate) fn put_logs(&self, namespace: &str, name: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), logs.to_string());
    }

    pub(crate) fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    /// Make the next `replace_deployment` fail with the given message.
    pub(crate) fn fail_next_replace(&self, message: &str) {
        *self.replace_failure.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, operation: String) {
        self.operations.lock().unwrap().push(operation);
    }

    fn not_found(kind: &'static str, namespace: &str, name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.record(format!("get_pod {namespace}/{name}"));
        self.pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("Pod", namespace, name))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, ClusterError> {
        self.record(format!("get_deployment {namespace}/{name}"));
        self.deployments
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("Deployment", namespace, name))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        self.record(format!("get_job {namespace}/{name}"));
        self.jobs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("Job", namespace, name))
    }

    async fn replace_deployment(
        &self,
        namespace: &str,
        name: &str,
        deployment: Deployment,
    ) -> Result<(), ClusterError> {
        self.record(format!("replace_deployment {namespace}/{name}"));
        if let Some(message) = self.replace_failure.lock().unwrap().take() {
            return Err(ClusterError::Api(message));
        }
        let mut deployments = self.deployments.lock().unwrap();
        if !deployments.contains_key(&(namespace.to_string(), name.to_string())) {
            return Err(Self::not_found("Deployment", namespace, name));
        }
        deployments.insert((namespace.to_string(), name.to_string()), deployment);
        Ok(())
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        strategy: PatchStrategy,
        _body: Value,
    ) -> Result<(), ClusterError> {
        self.record(format!(
            "patch_deployment {namespace}/{name} strategy={strategy}"
        ));
        if self.deployment(namespace, name).is_none() {
            return Err(Self::not_found("Deployment", namespace, name));
        }
        Ok(())
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.record(format!(
            "scale_deployment {namespace}/{name} replicas={replicas}"
        ));
        let mut deployments = self.deployments.lock().unwrap();
        let deployment = deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Self::not_found("Deployment", namespace, name))?;
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete_pod {namespace}/{name}"));
        self.pods
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found("Pod", namespace, name))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterError> {
        self.record(format!("pod_logs {namespace}/{name} tail={tail_lines}"));
        self.logs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("Pod", namespace, name))
    }

    async fn pods_by_selector(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        self.record(format!("pods_by_selector {namespace} {selector}"));
        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace
                    && wanted.iter().all(|(k, v)| {
                        pod.metadata
                            .labels
                            .as_ref()
                            .and_then(|labels| labels.get(*k))
                            .is_some_and(|value| value.as_str() == *v)
                    })
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }
}

/// Mailer that records sends as `(to, subject, body)` tuples.
#[derive(Default)]
pub(crate) struct FakeMailer {
    sent: Mutex<Vec<(String, String, String)>>,
    failing: bool,
}

impl FakeMailer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        if self.failing {
            return Err(MailError::Transport("connection refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

/// Agent that records prompts and answers with a fixed summary, or fails.
pub(crate) struct FakeAgent {
    response: String,
    failure: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub(crate) fn succeeding(response: &str) -> Self {
        Self {
            response: response.to_string(),
            failure: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemediationAgent for FakeAgent {
    async fn run(&self, prompt: &str) -> Result<String, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(AgentError::Http(message));
        }
        Ok(self.response.clone())
    }
}

/// A deployment with an `app=<name>` selector, as the controllers create.
pub(crate) fn deployment_with_replicas(namespace: &str, name: &str, replicas: i32) -> Deployment {
    let labels: BTreeMap<String, String> =
        [("app".to_string(), name.to_string())].into_iter().collect();
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..LabelSelector::default()
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// A crash-looping pod labelled `app=<first name segment>` so selector-based
/// lookups resolve it as a workload pod.
pub(crate) fn failing_pod(namespace: &str, name: &str) -> Pod {
    let app = name.split('-').next().unwrap_or(name).to_string();
    let labels: BTreeMap<String, String> = [("app".to_string(), app)].into_iter().collect();
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "app".to_string(),
                restart_count: 5,
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("CrashLoopBackOff".to_string()),
                        message: Some("back-off 5m".to_string()),
                    }),
                    ..ContainerState::default()
                }),
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

pub(crate) fn job_with_backoff(
    namespace: &str,
    name: &str,
    backoff_limit: i32,
    failed: i32,
) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(backoff_limit),
            ..JobSpec::default()
        }),
        status: Some(JobStatus {
            failed: Some(failed),
            ..JobStatus::default()
        }),
    }
}
