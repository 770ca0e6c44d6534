use std::sync::Arc;

use anyhow::{Context, Result};
use cluster::{ClusterOps, InMemoryCluster, KubeCluster};
use fscache::FunctionServiceCache;
use poolmgr::{
    events::EnvironmentEvents,
    GenericPoolManager,
    PoolReconciler,
    SpecializedPodReconciler,
};
use tokio::{
    self,
    signal,
    sync::watch,
};
use tracing::info;

use crate::config::ExecutorConfig;

#[derive(Clone)]
pub struct Service {
    pub config: ExecutorConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub cluster: Arc<dyn ClusterOps>,
    pub fsvc_cache: Arc<FunctionServiceCache>,
    pub pool_manager: Arc<GenericPoolManager>,
    pub pool_reconciler: Arc<PoolReconciler>,
    pub specialized_pod_reconciler: Arc<SpecializedPodReconciler>,
    pub environment_events: EnvironmentEvents,
}

impl Service {
    pub async fn new(config: ExecutorConfig) -> Result<Self> {
        let cluster: Arc<dyn ClusterOps> = if config.cluster.in_memory {
            Arc::new(InMemoryCluster::new())
        } else {
            Arc::new(
                KubeCluster::try_default()
                    .await
                    .context("error initializing cluster client")?,
            )
        };
        Self::with_cluster(config, cluster)
    }

    /// Wires the engine over an already-built cluster backend.
    pub fn with_cluster(config: ExecutorConfig, cluster: Arc<dyn ClusterOps>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let fsvc_cache = Arc::new(FunctionServiceCache::new());
        let pool_manager = Arc::new(GenericPoolManager::new(
            cluster.clone(),
            fsvc_cache.clone(),
            config.function_namespace.clone(),
        ));
        let pool_reconciler = Arc::new(PoolReconciler::new(pool_manager.clone()));
        let specialized_pod_reconciler = Arc::new(SpecializedPodReconciler::new(
            cluster.clone(),
            fsvc_cache.clone(),
            config.function_namespace.clone(),
        ));
        let environment_events = EnvironmentEvents::new(config.event_buffer);

        Ok(Self {
            config,
            shutdown_tx,
            shutdown_rx,
            cluster,
            fsvc_cache,
            pool_manager,
            pool_reconciler,
            specialized_pod_reconciler,
            environment_events,
        })
    }

    /// Subscribes both reconcilers to the environment stream. Each consumes
    /// its own sequential stream; the two run concurrently with each other.
    pub fn spawn_reconcilers(&self) {
        self.environment_events
            .spawn_consumer(self.pool_reconciler.clone(), self.shutdown_rx.clone());
        self.environment_events.spawn_consumer(
            self.specialized_pod_reconciler.clone(),
            self.shutdown_rx.clone(),
        );
    }

    /// Starts the reconcilers and blocks until shutdown.
    pub async fn start(&self) -> Result<()> {
        self.spawn_reconcilers();

        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_tx).await;
        });

        info!(
            namespace = self.config.function_namespace,
            "pool engine started, consuming environment notifications"
        );
        let mut shutdown_rx = self.shutdown_rx.clone();
        let _ = shutdown_rx.changed().await;
        info!("pool engine shut down");
        Ok(())
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    shutdown_tx.send(()).unwrap();
    info!("signal received, shutting down gracefully");
}
