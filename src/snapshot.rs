//! Pre-remediation state capture.
//!
//! Stores a deep copy of a Deployment's spec keyed by resource id, taken just
//! before the agent is let loose on the resource. The copy is independent of
//! anything the cluster API returns later, so rollback restores exactly what
//! was captured. State is process-local and lost on restart.

use crate::cluster::{ClusterError, ClusterOps};
use crate::fault::{resource_id, FaultKind};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DeploymentSpec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not supported for kind {0}")]
    Unsupported(FaultKind),
    #[error("deployment {namespace}/{name} has no spec")]
    MissingSpec { namespace: String, name: String },
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// A captured Deployment spec.
#[derive(Debug, Clone)]
pub struct DeploymentSnapshot {
    pub captured_at: DateTime<Utc>,
    pub namespace: String,
    pub name: String,
    pub spec: DeploymentSpec,
}

pub struct SnapshotService {
    cluster: Arc<dyn ClusterOps>,
    snapshots: Mutex<HashMap<String, DeploymentSnapshot>>,
}

impl SnapshotService {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            cluster,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Capture the current spec of a resource. Only Deployments are
    /// supported; a repeat capture for the same key overwrites.
    pub async fn capture(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), SnapshotError> {
        if kind != FaultKind::Deployment {
            return Err(SnapshotError::Unsupported(kind));
        }

        let deployment = self.cluster.get_deployment(namespace, name).await?;
        let spec = deployment
            .spec
            .ok_or_else(|| SnapshotError::MissingSpec {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let key = resource_id(kind, namespace, name);
        info!(resource = %key, "captured deployment snapshot");

        let mut snapshots = self.snapshots.lock().expect("snapshot lock poisoned");
        snapshots.insert(
            key,
            DeploymentSnapshot {
                captured_at: Utc::now(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                spec,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, kind: FaultKind, namespace: &str, name: &str) -> Option<DeploymentSnapshot> {
        let snapshots = self.snapshots.lock().expect("snapshot lock poisoned");
        snapshots.get(&resource_id(kind, namespace, name)).cloned()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}
