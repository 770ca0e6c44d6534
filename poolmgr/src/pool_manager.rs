use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use cluster::ClusterOps;
use data_model::{Environment, EnvironmentRef};
use fscache::FunctionServiceCache;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::pool::GenericPool;

/// Registry of warm-pod pools keyed by environment identity. Owns the
/// function service cache shared by specialization and eviction.
///
/// The registry mutex is held across pool provisioning, so create-if-absent
/// is atomic: of any number of concurrent first callers for a never-seen
/// environment, exactly one provisions and the rest observe the registered
/// pool.
pub struct GenericPoolManager {
    cluster: Arc<dyn ClusterOps>,
    fsvc_cache: Arc<FunctionServiceCache>,
    namespace: String,
    pools: Mutex<HashMap<EnvironmentRef, Arc<GenericPool>>>,
}

impl GenericPoolManager {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        fsvc_cache: Arc<FunctionServiceCache>,
        namespace: String,
    ) -> Self {
        Self {
            cluster,
            fsvc_cache,
            namespace,
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> Arc<FunctionServiceCache> {
        self.fsvc_cache.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the pool registered for this environment, provisioning and
    /// registering one sized to the declared pool size if none exists. The
    /// boolean reports whether this call created the pool.
    pub async fn get_or_create_pool(
        &self,
        env: &Environment,
    ) -> Result<(Arc<GenericPool>, bool)> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&env.reference()) {
            return Ok((pool.clone(), false));
        }

        let pool = Arc::new(GenericPool::new(
            self.cluster.clone(),
            self.fsvc_cache.clone(),
            env.clone(),
            self.namespace.clone(),
        ));
        pool.create_deployment().await?;
        pools.insert(env.reference(), pool.clone());
        info!(env = %env.reference(), pool_size = env.pool_size, "registered pool for environment");
        Ok((pool, true))
    }

    pub async fn pool_for(&self, env_ref: &EnvironmentRef) -> Option<Arc<GenericPool>> {
        self.pools.lock().await.get(env_ref).cloned()
    }

    /// Unregisters the environment's pool and tears down its deployment. A
    /// missing pool is success: cleanup of something already gone is done.
    pub async fn cleanup_pool(&self, env: &Environment) -> Result<()> {
        let pool = self.pools.lock().await.remove(&env.reference());
        match pool {
            Some(pool) => pool.cleanup().await,
            None => {
                debug!(env = %env.reference(), "no pool registered for environment");
                Ok(())
            }
        }
    }
}
