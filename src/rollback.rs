//! Restore a Deployment to its captured pre-remediation spec.

use crate::cluster::{ClusterError, ClusterOps};
use crate::fault::{resource_id, FaultKind};
use crate::snapshot::SnapshotService;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no snapshot found for {0}")]
    NoSnapshot(String),
    #[error("rollback not supported for kind {0}")]
    Unsupported(FaultKind),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub struct RollbackService {
    cluster: Arc<dyn ClusterOps>,
    snapshots: Arc<SnapshotService>,
}

impl RollbackService {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterOps>, snapshots: Arc<SnapshotService>) -> Self {
        Self { cluster, snapshots }
    }

    /// Replace the live spec with the snapshotted one via get-then-update.
    /// Update failures (version conflicts included) return verbatim; rollback
    /// is never retried.
    pub async fn perform(
        &self,
        kind: FaultKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), RollbackError> {
        if kind != FaultKind::Deployment {
            return Err(RollbackError::Unsupported(kind));
        }

        let key = resource_id(kind, namespace, name);
        let Some(snapshot) = self.snapshots.get(kind, namespace, name) else {
            return Err(RollbackError::NoSnapshot(key));
        };

        info!(
            resource = %key,
            captured_at = %snapshot.captured_at,
            "restoring deployment from snapshot"
        );

        let mut current = self.cluster.get_deployment(namespace, name).await?;
        current.spec = Some(snapshot.spec);
        self.cluster
            .replace_deployment(namespace, name, current)
            .await?;

        info!(resource = %key, "rollback successful");
        Ok(())
    }
}
