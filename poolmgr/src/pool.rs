use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use cluster::{ClusterOps, PoolDeployment};
use data_model::{
    labels,
    Environment,
    EnvironmentRef,
    FuncSvc,
    FuncSvcBuilder,
    FunctionRef,
    PodInfo,
};
use fscache::FunctionServiceCache;
use rand::seq::IndexedRandom;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// One environment's warm-pod pool: the backing deployment plus the
/// bookkeeping needed to hand out warm pods without double-allocating them.
pub struct GenericPool {
    env_ref: EnvironmentRef,
    deployment_name: String,
    namespace: String,
    /// Latest environment spec this pool has been reconciled against.
    env: RwLock<Environment>,
    cluster: Arc<dyn ClusterOps>,
    fsvc_cache: Arc<FunctionServiceCache>,
    /// Pods taken out of the warm set but not yet specialized.
    in_flight: Mutex<HashSet<String>>,
}

impl GenericPool {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        fsvc_cache: Arc<FunctionServiceCache>,
        env: Environment,
        namespace: String,
    ) -> Self {
        let env_ref = env.reference();
        let uid_prefix: String = env_ref.uid.chars().take(8).collect();
        let deployment_name = format!("poolmgr-{}-{}", env_ref.name, uid_prefix);
        Self {
            env_ref,
            deployment_name,
            namespace,
            env: RwLock::new(env),
            cluster,
            fsvc_cache,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn environment(&self) -> &EnvironmentRef {
        &self.env_ref
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    pub async fn pool_size(&self) -> u32 {
        self.env.read().await.pool_size
    }

    /// Provisions the warm deployment at the environment's declared size.
    pub async fn create_deployment(&self) -> Result<()> {
        let env = self.env.read().await.clone();
        self.cluster
            .upsert_deployment(PoolDeployment {
                name: self.deployment_name.clone(),
                namespace: self.namespace.clone(),
                replicas: env.pool_size as i32,
                selector: labels::managed_pod_labels(&self.env_ref),
                image: env.runtime.image.clone(),
                image_pull_policy: env.runtime.image_pull_policy.clone(),
            })
            .await
            .context("error provisioning warm pool deployment")
    }

    /// Reconciles replica count and pod template to the environment's
    /// current declared state. The pool's identity is untouched and pods
    /// already specialized out of it are never affected; safe to call
    /// concurrently with pod hand-out.
    pub async fn update_deployment(&self, new_env: &Environment) -> Result<()> {
        {
            let mut env = self.env.write().await;
            *env = new_env.clone();
        }
        self.cluster
            .patch_deployment(
                &self.namespace,
                &self.deployment_name,
                new_env.pool_size as i32,
                &new_env.runtime.image,
            )
            .await
            .context("error updating warm pool deployment")?;
        info!(
            env = %self.env_ref,
            deployment = self.deployment_name,
            replicas = new_env.pool_size,
            "updated deployment for pool"
        );
        Ok(())
    }

    /// Removes one pod from the warm set and claims it for specialization.
    /// Returns None when no addressable warm pod is available. The claim set
    /// is held across the list so concurrent takers cannot race to the same
    /// pod.
    pub async fn take_warm_pod(&self) -> Result<Option<PodInfo>> {
        let selector = labels::managed_pod_labels(&self.env_ref);
        let mut claims = self.in_flight.lock().await;
        let pods = self
            .cluster
            .list_pods(&self.namespace, &selector)
            .await
            .context("error listing warm pods")?;
        let candidates: Vec<PodInfo> = pods
            .into_iter()
            .filter(|pod| pod.address.is_some() && !claims.contains(&pod.name))
            .collect();
        let Some(pod) = candidates.choose(&mut rand::rng()).cloned() else {
            return Ok(None);
        };
        claims.insert(pod.name.clone());
        Ok(Some(pod))
    }

    /// Turns a claimed warm pod into a dedicated function-serving pod:
    /// relabels it out of the pool, stamps the cache key onto it, and
    /// records the binding. An existing binding for the pod is never
    /// overwritten; the conflicting pod is deleted and the error returned.
    pub async fn specialize_pod(&self, pod: &PodInfo, function: &FunctionRef) -> Result<FuncSvc> {
        let address = pod
            .address
            .clone()
            .ok_or_else(|| anyhow!("pod {} has no address", pod.name))?;
        let pod_key = pod.name.clone();

        let new_labels = labels::specialized_pod_labels(&self.env_ref);
        let annotations = BTreeMap::from([(
            labels::FUNCTION_SERVICE_KEY.to_string(),
            pod_key.clone(),
        )]);
        if let Err(err) = self
            .cluster
            .patch_pod_meta(&pod.namespace, &pod.name, new_labels, annotations)
            .await
        {
            self.release_claim(&pod.name).await;
            warn!(
                pod = pod.name,
                "failed to relabel pod for specialization, deleting it: {err:?}"
            );
            self.delete_pod_best_effort(pod).await;
            return Err(err);
        }

        let fsvc = FuncSvcBuilder::default()
            .function(function.clone())
            .environment(self.env_ref.clone())
            .pod_name(pod.name.clone())
            .pod_key(pod_key)
            .address(address)
            .build()?;
        let fsvc = match self.fsvc_cache.insert(fsvc) {
            Ok(fsvc) => fsvc,
            Err(err) => {
                self.release_claim(&pod.name).await;
                // Already relabeled out of the pool; leaving it behind would
                // orphan it.
                self.delete_pod_best_effort(pod).await;
                return Err(err.into());
            }
        };
        self.release_claim(&pod.name).await;
        info!(
            env = %self.env_ref,
            pod = fsvc.pod_name,
            function = %fsvc.function,
            address = fsvc.address,
            "specialized warm pod"
        );
        Ok((*fsvc).clone())
    }

    /// Scales down and removes the warm deployment. Idempotent; a deployment
    /// that is already gone is success.
    pub async fn cleanup(&self) -> Result<()> {
        self.cluster
            .delete_deployment(&self.namespace, &self.deployment_name)
            .await
            .context("error deleting warm pool deployment")?;
        self.in_flight.lock().await.clear();
        info!(
            env = %self.env_ref,
            deployment = self.deployment_name,
            "cleaned up warm pool"
        );
        Ok(())
    }

    async fn release_claim(&self, pod_name: &str) {
        self.in_flight.lock().await.remove(pod_name);
    }

    async fn delete_pod_best_effort(&self, pod: &PodInfo) {
        if let Err(err) = self.cluster.delete_pod(&pod.namespace, &pod.name).await {
            warn!(pod = pod.name, "failed to delete pod: {err:?}");
        }
    }
}
