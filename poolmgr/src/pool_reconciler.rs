use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use data_model::Environment;
use tracing::{debug, info};

use crate::{
    events::{EnvironmentEvent, EnvironmentEventHandler},
    pool_manager::GenericPoolManager,
};

/// Drives pool creation, resize and teardown from environment lifecycle
/// notifications. Pods already specialized out of a pool are never touched
/// here; retiring those is `SpecializedPodReconciler`'s job, so a resize
/// failure and a specialized-pod teardown failure stay isolated from each
/// other.
pub struct PoolReconciler {
    gpm: Arc<GenericPoolManager>,
}

impl PoolReconciler {
    pub fn new(gpm: Arc<GenericPoolManager>) -> Self {
        Self { gpm }
    }

    async fn ensure_pool(&self, env: &Environment) -> Result<()> {
        let (pool, created) = self.gpm.get_or_create_pool(env).await?;
        if created {
            info!(env = %env.reference(), "created pool for the environment");
            return Ok(());
        }
        // Pool pre-existed (reconnect or replay): converge it in place.
        pool.update_deployment(env).await
    }
}

#[async_trait]
impl EnvironmentEventHandler for PoolReconciler {
    fn name(&self) -> &'static str {
        "pool-reconciler"
    }

    async fn handle(&self, event: &EnvironmentEvent) -> Result<()> {
        match event {
            EnvironmentEvent::Created(env) => {
                debug!(env = %env.reference(), "environment created");
                if env.pool_size == 0 {
                    info!(env = %env.reference(), "pool size is zero");
                    return Ok(());
                }
                self.ensure_pool(env).await
            }
            EnvironmentEvent::Deleted(env) => {
                debug!(env = %env.reference(), "environment deleted");
                self.gpm.cleanup_pool(env).await
            }
            EnvironmentEvent::Updated { old, new } => {
                if old.resource_version == new.resource_version {
                    return Ok(());
                }
                debug!(env = %new.reference(), "environment updated");
                if new.pool_size == 0 {
                    return self.gpm.cleanup_pool(new).await;
                }
                self.ensure_pool(new).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use cluster::{in_memory::ClusterCall, InMemoryCluster};
    use data_model::{EnvironmentBuilder, RuntimeSpec};
    use fscache::FunctionServiceCache;

    use super::PoolReconciler;
    use crate::{
        events::{EnvironmentEvent, EnvironmentEventHandler},
        pool_manager::GenericPoolManager,
    };

    fn test_env(resource_version: &str, pool_size: u32) -> data_model::Environment {
        EnvironmentBuilder::default()
            .name("python".to_string())
            .namespace("ns".to_string())
            .uid("u1".to_string())
            .resource_version(resource_version.to_string())
            .pool_size(pool_size)
            .runtime(RuntimeSpec {
                image: "python-runtime:1".to_string(),
                image_pull_policy: None,
            })
            .build()
            .unwrap()
    }

    fn test_reconciler() -> (Arc<InMemoryCluster>, Arc<GenericPoolManager>, PoolReconciler) {
        let cluster = Arc::new(InMemoryCluster::new());
        let gpm = Arc::new(GenericPoolManager::new(
            cluster.clone(),
            Arc::new(FunctionServiceCache::new()),
            "fnpool-fn".to_string(),
        ));
        let reconciler = PoolReconciler::new(gpm.clone());
        (cluster, gpm, reconciler)
    }

    #[tokio::test]
    async fn test_create_with_zero_pool_size_is_a_noop() -> Result<()> {
        let (cluster, gpm, reconciler) = test_reconciler();
        reconciler
            .handle(&EnvironmentEvent::Created(test_env("1", 0)))
            .await?;
        assert!(cluster.take_calls().is_empty());
        assert!(gpm.pool_for(&test_env("1", 0).reference()).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_provisions_pool_once_then_resizes_in_place() -> Result<()> {
        let (cluster, gpm, reconciler) = test_reconciler();
        let env = test_env("1", 3);
        reconciler
            .handle(&EnvironmentEvent::Created(env.clone()))
            .await?;
        let pool = gpm.pool_for(&env.reference()).await.unwrap();
        assert_eq!(
            cluster.take_calls(),
            vec![ClusterCall::UpsertDeployment {
                name: pool.deployment_name().to_string(),
                replicas: 3,
            }]
        );

        // Replayed create for a pre-existing pool reconciles instead of
        // provisioning again.
        reconciler
            .handle(&EnvironmentEvent::Created(env.clone()))
            .await?;
        assert_eq!(
            cluster.take_calls(),
            vec![ClusterCall::PatchDeployment {
                name: pool.deployment_name().to_string(),
                replicas: 3,
            }]
        );
        let pool_again = gpm.pool_for(&env.reference()).await.unwrap();
        assert!(Arc::ptr_eq(&pool, &pool_again));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_with_unchanged_version_token_is_discarded() -> Result<()> {
        let (cluster, _gpm, reconciler) = test_reconciler();
        let env = test_env("5", 3);
        reconciler
            .handle(&EnvironmentEvent::Created(env.clone()))
            .await?;
        cluster.take_calls();

        reconciler
            .handle(&EnvironmentEvent::Updated {
                old: env.clone(),
                new: env.clone(),
            })
            .await?;
        assert!(cluster.take_calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_to_zero_pool_size_cleans_up_exactly_once() -> Result<()> {
        let (cluster, gpm, reconciler) = test_reconciler();
        let old = test_env("1", 3);
        reconciler
            .handle(&EnvironmentEvent::Created(old.clone()))
            .await?;
        let pool = gpm.pool_for(&old.reference()).await.unwrap();
        let deployment_name = pool.deployment_name().to_string();
        cluster.take_calls();

        let new = test_env("2", 0);
        reconciler
            .handle(&EnvironmentEvent::Updated {
                old: old.clone(),
                new: new.clone(),
            })
            .await?;
        assert_eq!(
            cluster.take_calls(),
            vec![ClusterCall::DeleteDeployment {
                name: deployment_name,
            }]
        );
        assert!(gpm.pool_for(&new.reference()).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_resizes_existing_pool() -> Result<()> {
        let (cluster, gpm, reconciler) = test_reconciler();
        let old = test_env("1", 3);
        reconciler
            .handle(&EnvironmentEvent::Created(old.clone()))
            .await?;
        let pool = gpm.pool_for(&old.reference()).await.unwrap();
        cluster.take_calls();

        let new = test_env("2", 5);
        reconciler
            .handle(&EnvironmentEvent::Updated {
                old,
                new: new.clone(),
            })
            .await?;
        assert_eq!(
            cluster.take_calls(),
            vec![ClusterCall::PatchDeployment {
                name: pool.deployment_name().to_string(),
                replicas: 5,
            }]
        );
        assert_eq!(pool.pool_size().await, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cleans_up_unconditionally() -> Result<()> {
        let (_cluster, gpm, reconciler) = test_reconciler();
        let env = test_env("1", 3);
        reconciler
            .handle(&EnvironmentEvent::Created(env.clone()))
            .await?;
        reconciler
            .handle(&EnvironmentEvent::Deleted(env.clone()))
            .await?;
        assert!(gpm.pool_for(&env.reference()).await.is_none());

        // Delete for an environment with no pool also succeeds.
        reconciler
            .handle(&EnvironmentEvent::Deleted(test_env("1", 0)))
            .await?;
        Ok(())
    }
}
