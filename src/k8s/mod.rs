//! Kubernetes client construction and the watcher set.

pub mod deployment;
pub mod job;
pub mod pod;
pub(crate) mod watch;

use crate::config::KubernetesConfig;
use anyhow::{Context as _, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use tracing::warn;

/// Capacity of every inter-component channel in the pipeline.
pub const CHANNEL_CAPACITY: usize = 100;

/// Build a cluster client per the configured connection mode.
///
/// Out-of-cluster kubeconfig failures fall back to in-cluster config, which
/// keeps hybrid setups (mounted kubeconfig inside a pod) working.
pub async fn build_client(config: &KubernetesConfig) -> Result<Client> {
    if config.in_cluster {
        let cluster_config =
            kube::Config::incluster().context("failed to load in-cluster config")?;
        return Client::try_from(cluster_config).context("failed to build cluster client");
    }

    if !config.kube_config_path.is_empty() {
        match client_from_kubeconfig(&config.kube_config_path).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                warn!(
                    path = %config.kube_config_path,
                    error = %err,
                    "failed to build client from kubeconfig, trying in-cluster fallback"
                );
                if let Ok(cluster_config) = kube::Config::incluster() {
                    return Client::try_from(cluster_config)
                        .context("failed to build cluster client");
                }
                return Err(err);
            }
        }
    }

    Client::try_default()
        .await
        .context("failed to build cluster client from default config")
}

async fn client_from_kubeconfig(path: &str) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig from {path}"))?;
    let cluster_config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("failed to interpret kubeconfig")?;
    Client::try_from(cluster_config).context("failed to build cluster client")
}

/// One `Api` handle per monitored namespace; empty means all namespaces.
pub(crate) fn apis_for<K>(client: &Client, namespaces: &[String]) -> Vec<Api<K>>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    if namespaces.is_empty() {
        vec![Api::all(client.clone())]
    } else {
        namespaces
            .iter()
            .map(|ns| Api::namespaced(client.clone(), ns))
            .collect()
    }
}
