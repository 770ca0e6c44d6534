//! In-process cluster backend for dev mode and tests.
//!
//! Keeps pods and deployments in a mutexed map and plays the replica
//! controller's role: writing a deployment reconciles its pod count against
//! the selector. Relabeling a pod out of the selector does NOT trigger a
//! back-fill; that only happens on the next deployment write, which mirrors
//! the asynchronous back-fill of a real cluster closely enough for the pool
//! engine's tests. Every mutation and list is appended to an operation log
//! so tests can assert on exactly which calls a reconciliation pass made.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use data_model::PodInfo;
use tracing::debug;

use crate::{selector_string, ClusterOps, PoolDeployment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    ListPods { namespace: String, selector: String },
    DeletePod { name: String },
    PatchPodMeta { name: String },
    UpsertDeployment { name: String, replicas: i32 },
    PatchDeployment { name: String, replicas: i32 },
    DeleteDeployment { name: String },
}

#[derive(Default)]
struct State {
    pods: BTreeMap<(String, String), PodInfo>,
    deployments: BTreeMap<(String, String), PoolDeployment>,
    next_ip: u32,
}

#[derive(Default)]
pub struct InMemoryCluster {
    inner: Mutex<State>,
    calls: Mutex<Vec<ClusterCall>>,
}

fn matches(labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|l| l == v).unwrap_or(false))
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the operation log.
    pub fn take_calls(&self) -> Vec<ClusterCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Seeds a pod directly, bypassing any deployment. Test setup only.
    pub fn insert_pod(&self, pod: PodInfo) {
        self.inner
            .lock()
            .unwrap()
            .pods
            .insert((pod.namespace.clone(), pod.name.clone()), pod);
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.inner
            .lock()
            .unwrap()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Pods matching a selector, without going through the operation log.
    pub fn pods_matching(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Vec<PodInfo> {
        self.inner
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|pod| pod.namespace == namespace && matches(&pod.labels, selector))
            .cloned()
            .collect()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<PoolDeployment> {
        self.inner
            .lock()
            .unwrap()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, call: ClusterCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn reconcile_deployment(state: &mut State, namespace: &str, name: &str) {
        let Some(deployment) = state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
        else {
            return;
        };

        let matching: Vec<(String, String)> = state
            .pods
            .iter()
            .filter(|(_, pod)| {
                pod.namespace == namespace && matches(&pod.labels, &deployment.selector)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let desired = deployment.replicas.max(0) as usize;
        if matching.len() < desired {
            for _ in matching.len()..desired {
                state.next_ip += 1;
                let pod_name = format!("{}-{}", deployment.name, nanoid::nanoid!(6));
                let address = format!("10.244.{}.{}", state.next_ip / 256, state.next_ip % 256);
                state.pods.insert(
                    (namespace.to_string(), pod_name.clone()),
                    PodInfo {
                        name: pod_name,
                        namespace: namespace.to_string(),
                        address: Some(address),
                        labels: deployment.selector.clone(),
                        annotations: BTreeMap::new(),
                    },
                );
            }
        } else {
            for key in matching.into_iter().skip(desired) {
                state.pods.remove(&key);
            }
        }
    }
}

#[async_trait]
impl ClusterOps for InMemoryCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        self.record(ClusterCall::ListPods {
            namespace: namespace.to_string(),
            selector: selector_string(selector),
        });
        Ok(self.pods_matching(namespace, selector))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(ClusterCall::DeletePod {
            name: name.to_string(),
        });
        let removed = self
            .inner
            .lock()
            .unwrap()
            .pods
            .remove(&(namespace.to_string(), name.to_string()));
        if removed.is_none() {
            debug!(pod = name, "pod already gone");
        }
        Ok(())
    }

    async fn patch_pod_meta(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(ClusterCall::PatchPodMeta {
            name: name.to_string(),
        });
        let mut state = self.inner.lock().unwrap();
        let pod = state
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("pod {}/{} not found", namespace, name))?;
        pod.labels.extend(labels);
        pod.annotations.extend(annotations);
        Ok(())
    }

    async fn upsert_deployment(&self, deployment: PoolDeployment) -> Result<()> {
        self.record(ClusterCall::UpsertDeployment {
            name: deployment.name.clone(),
            replicas: deployment.replicas,
        });
        let mut state = self.inner.lock().unwrap();
        let key = (deployment.namespace.clone(), deployment.name.clone());
        let (namespace, name) = (deployment.namespace.clone(), deployment.name.clone());
        state.deployments.insert(key, deployment);
        Self::reconcile_deployment(&mut state, &namespace, &name);
        Ok(())
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        image: &str,
    ) -> Result<()> {
        self.record(ClusterCall::PatchDeployment {
            name: name.to_string(),
            replicas,
        });
        let mut state = self.inner.lock().unwrap();
        let deployment = state
            .deployments
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("deployment {}/{} not found", namespace, name))?;
        deployment.replicas = replicas;
        deployment.image = image.to_string();
        Self::reconcile_deployment(&mut state, namespace, name);
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(ClusterCall::DeleteDeployment {
            name: name.to_string(),
        });
        let mut state = self.inner.lock().unwrap();
        let removed = state
            .deployments
            .remove(&(namespace.to_string(), name.to_string()));
        match removed {
            Some(deployment) => {
                // Cascade to the pods the deployment still selects.
                state.pods.retain(|_, pod| {
                    pod.namespace != namespace || !matches(&pod.labels, &deployment.selector)
                });
            }
            None => debug!(deployment = name, "deployment already gone"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::Result;

    use super::InMemoryCluster;
    use crate::{ClusterOps, PoolDeployment};

    fn selector() -> BTreeMap<String, String> {
        BTreeMap::from([("managed".to_string(), "true".to_string())])
    }

    fn deployment(replicas: i32) -> PoolDeployment {
        PoolDeployment {
            name: "pool".to_string(),
            namespace: "ns".to_string(),
            replicas,
            selector: selector(),
            image: "runtime:1".to_string(),
            image_pull_policy: None,
        }
    }

    #[tokio::test]
    async fn test_deployment_writes_reconcile_pod_count() -> Result<()> {
        let cluster = InMemoryCluster::new();
        cluster.upsert_deployment(deployment(3)).await?;
        assert_eq!(cluster.list_pods("ns", &selector()).await?.len(), 3);

        cluster.patch_deployment("ns", "pool", 1, "runtime:1").await?;
        assert_eq!(cluster.list_pods("ns", &selector()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_relabeled_pod_is_not_backfilled_until_next_write() -> Result<()> {
        let cluster = InMemoryCluster::new();
        cluster.upsert_deployment(deployment(2)).await?;
        let pod = cluster.list_pods("ns", &selector()).await?.remove(0);

        cluster
            .patch_pod_meta(
                "ns",
                &pod.name,
                BTreeMap::from([("managed".to_string(), "false".to_string())]),
                BTreeMap::new(),
            )
            .await?;
        assert_eq!(cluster.list_pods("ns", &selector()).await?.len(), 1);

        cluster.patch_deployment("ns", "pool", 2, "runtime:1").await?;
        assert_eq!(cluster.list_pods("ns", &selector()).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_deployment_cascades_to_selected_pods() -> Result<()> {
        let cluster = InMemoryCluster::new();
        cluster.upsert_deployment(deployment(2)).await?;
        cluster.delete_deployment("ns", "pool").await?;
        assert!(cluster.list_pods("ns", &selector()).await?.is_empty());

        // Second delete is a no-op, not an error.
        cluster.delete_deployment("ns", "pool").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_missing_pod_is_success() -> Result<()> {
        let cluster = InMemoryCluster::new();
        cluster.delete_pod("ns", "nope").await?;
        Ok(())
    }
}
