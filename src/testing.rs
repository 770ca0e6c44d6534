use std::{sync::Arc, time::Duration};

use anyhow::Result;
use cluster::InMemoryCluster;
use poolmgr::events::EnvironmentEvent;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::ExecutorConfig, service::Service};

pub struct TestService {
    pub service: Service,
    pub cluster: Arc<InMemoryCluster>,
}

impl TestService {
    pub fn new() -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let cfg = ExecutorConfig {
            cluster: crate::config::ClusterConfig { in_memory: true },
            ..Default::default()
        };
        let cluster = Arc::new(InMemoryCluster::new());
        let service = Service::with_cluster(cfg, cluster.clone())?;
        service.spawn_reconcilers();

        Ok(Self { service, cluster })
    }

    pub fn publish(&self, event: EnvironmentEvent) {
        self.service
            .environment_events
            .sender()
            .send(event)
            .expect("environment event consumers should be running");
    }

    /// Polls a condition over the in-memory cluster until it holds or the
    /// deadline passes.
    pub async fn wait_until<F>(&self, mut condition: F, what: &str)
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
