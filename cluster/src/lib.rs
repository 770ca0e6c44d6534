//! Seam to the cluster orchestration API.
//!
//! The pool engine only ever needs to list and delete pods, rewrite pod
//! metadata, and create/resize/remove the warm deployments backing its
//! pools; everything else about scheduling and pod lifecycle stays with the
//! cluster. Two backends implement the seam: `KubeCluster` against a real
//! API server, and `InMemoryCluster` for dev mode and tests.

pub mod in_memory;
pub mod kubernetes;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use data_model::PodInfo;
pub use in_memory::InMemoryCluster;
pub use kubernetes::KubeCluster;

/// Declared state of one environment's warm-pod deployment. The selector
/// doubles as the pod template labels, so relabeling a pod out of the
/// selector hands it to the caller and lets the cluster back-fill the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeployment {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub selector: BTreeMap<String, String>,
    pub image: String,
    pub image_pull_policy: Option<String>,
}

/// Cluster operations consumed by the pool engine. Deletions treat a missing
/// resource as success; every other failure is surfaced to the caller.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn patch_pod_meta(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    async fn upsert_deployment(&self, deployment: PoolDeployment) -> Result<()>;

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        image: &str,
    ) -> Result<()>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;
}

pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
