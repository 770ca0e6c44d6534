use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cluster::ClusterOps;
use data_model::{labels, Environment};
use fscache::FunctionServiceCache;
use tracing::{debug, error, info};

use crate::events::{EnvironmentEvent, EnvironmentEventHandler};

/// Retires specialized pods whose environment spec became stale: on
/// environment delete, and on updates that supersede the spec the pods were
/// bound against. The pool itself is resized independently by
/// `PoolReconciler`; this handler only ever touches pods that have left
/// their pool.
pub struct SpecializedPodReconciler {
    cluster: Arc<dyn ClusterOps>,
    fsvc_cache: Arc<FunctionServiceCache>,
    namespace: String,
}

impl SpecializedPodReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        fsvc_cache: Arc<FunctionServiceCache>,
        namespace: String,
    ) -> Self {
        Self {
            cluster,
            fsvc_cache,
            namespace,
        }
    }

    /// Enumerate the environment's specialized pods, evict their bindings
    /// and delete them. A list failure aborts the pass and is retried by
    /// the next notification or resync; per-pod failures are logged and
    /// skipped so the rest of the batch still goes through.
    async fn retire_specialized_pods(&self, env: &Environment, reason: &str) -> Result<()> {
        let selector = labels::specialized_pod_labels(&env.reference());
        let pods = self
            .cluster
            .list_pods(&self.namespace, &selector)
            .await
            .context("error listing specialized pods")?;
        info!(
            env = %env.reference(),
            num_pods = pods.len(),
            reason,
            "pods identified for cleanup"
        );

        for pod in pods {
            let cache_key = pod.cache_key();
            if let Some(fsvc) = self.fsvc_cache.lookup_by_pod(&cache_key) {
                // Both directions; leaving either index populated would leak
                // the binding.
                self.fsvc_cache.delete_function_entry(&fsvc);
                self.fsvc_cache.delete_by_pod(&fsvc);
            }
            if let Err(err) = self.cluster.delete_pod(&pod.namespace, &pod.name).await {
                error!(
                    env = %env.reference(),
                    pod = pod.name,
                    "failed to delete specialized pod: {err:?}"
                );
                continue;
            }
            info!(
                env = %env.reference(),
                pod = pod.name,
                address = pod.address.clone().unwrap_or_default(),
                reason,
                "cleaned up specialized pod"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl EnvironmentEventHandler for SpecializedPodReconciler {
    fn name(&self) -> &'static str {
        "specialized-pod-reconciler"
    }

    async fn handle(&self, event: &EnvironmentEvent) -> Result<()> {
        match event {
            EnvironmentEvent::Created(env) => {
                // A brand-new environment has no specialized pods yet.
                debug!(env = %env.reference(), "environment created");
                Ok(())
            }
            EnvironmentEvent::Deleted(env) => {
                self.retire_specialized_pods(env, "environment deleted")
                    .await
            }
            EnvironmentEvent::Updated { old, new } => {
                if old.resource_version == new.resource_version {
                    return Ok(());
                }
                // Select on the old identity: the pods to retire are the
                // ones bound against the superseded spec.
                self.retire_specialized_pods(old, "environment updated")
                    .await
            }
        }
    }
}
