//! Shared fault data layer.
//!
//! Both the detection side (watchers, detector) and the remediation side
//! (orchestrator, notifications) depend on these types; nothing here depends
//! on the rest of the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workload kinds the pipeline observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    Pod,
    Deployment,
    Job,
}

impl FaultKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::Job => "Job",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" => Ok(Self::Pod),
            "deployment" => Ok(Self::Deployment),
            "job" => Ok(Self::Job),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

/// Short symbolic codes for everything the classifiers can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultReason {
    CrashLoopBackOff,
    ImagePullBackOff,
    ErrImagePull,
    CreateContainerConfigError,
    RunContainerError,
    OomKilled,
    ContainerError,
    PodFailed,
    DeploymentUnavailable,
    DeploymentStuck,
    JobFailed,
    JobBackoffLimitExceeded,
}

impl FaultReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CrashLoopBackOff => "CrashLoopBackOff",
            Self::ImagePullBackOff => "ImagePullBackOff",
            Self::ErrImagePull => "ErrImagePull",
            Self::CreateContainerConfigError => "CreateContainerConfigError",
            Self::RunContainerError => "RunContainerError",
            Self::OomKilled => "OOMKilled",
            Self::ContainerError => "ContainerError",
            Self::PodFailed => "PodFailed",
            Self::DeploymentUnavailable => "DeploymentUnavailable",
            Self::DeploymentStuck => "DeploymentStuck",
            Self::JobFailed => "JobFailed",
            Self::JobBackoffLimitExceeded => "JobBackoffLimitExceeded",
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw observation emitted by a watcher, before dedup/normalization.
#[derive(Debug, Clone)]
pub struct RawFault {
    pub kind: FaultKind,
    pub namespace: String,
    pub name: String,
    pub reason: FaultReason,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl RawFault {
    #[must_use]
    pub fn new(
        kind: FaultKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        reason: FaultReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            reason,
            message: message.into(),
            observed_at: Utc::now(),
        }
    }
}

/// A normalized fault record as forwarded to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub namespace: String,
    pub name: String,
    pub reason: FaultReason,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl Fault {
    #[must_use]
    pub fn from_raw(raw: RawFault) -> Self {
        Self {
            kind: raw.kind,
            namespace: raw.namespace,
            name: raw.name,
            reason: raw.reason,
            message: raw.message,
            detected_at: raw.observed_at,
        }
    }

    /// Canonical dedup key: `kind/namespace/name`. Stable for a given
    /// resource across observations.
    #[must_use]
    pub fn resource_id(&self) -> String {
        resource_id(self.kind, &self.namespace, &self.name)
    }
}

/// Canonical resource identifier shared by dedup, retry accounting, and the
/// snapshot store.
#[must_use]
pub fn resource_id(kind: FaultKind, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}
