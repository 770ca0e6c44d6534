//! Typed environment notification stream.
//!
//! Each registered handler consumes its own sequential stream off a
//! broadcast channel: events for one handler are processed in delivery
//! order with head-of-line blocking, while distinct handlers run
//! concurrently with each other. Delivery order is the only ordering
//! guarantee; a delete may well be followed by a stale update replay, so
//! handlers de-duplicate on version tokens, never on arrival order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use data_model::Environment;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum EnvironmentEvent {
    Created(Environment),
    Updated { old: Environment, new: Environment },
    Deleted(Environment),
}

#[async_trait]
pub trait EnvironmentEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handlers log and absorb their own failures where the batch should
    /// continue; anything returned here is logged by the consumer loop and
    /// the stream keeps flowing. No event may kill the loop.
    async fn handle(&self, event: &EnvironmentEvent) -> Result<()>;
}

#[derive(Clone)]
pub struct EnvironmentEvents {
    tx: broadcast::Sender<EnvironmentEvent>,
}

impl EnvironmentEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<EnvironmentEvent> {
        self.tx.clone()
    }

    /// Spawns the sequential consumer task for one handler.
    pub fn spawn_consumer(
        &self,
        handler: Arc<dyn EnvironmentEventHandler>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if let Err(err) = handler.handle(&event).await {
                                error!(
                                    handler = handler.name(),
                                    "error handling environment event: {err:?}"
                                );
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Dropped events are recovered by the next
                            // notification or resync for the same identity.
                            warn!(
                                handler = handler.name(),
                                missed, "environment event stream lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.changed() => {
                        info!(handler = handler.name(), "environment event consumer shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use data_model::EnvironmentBuilder;
    use tokio::sync::watch;

    use super::{EnvironmentEvent, EnvironmentEventHandler, EnvironmentEvents};

    struct CountingHandler {
        seen: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EnvironmentEventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &EnvironmentEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("synthetic handler failure"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_failures_do_not_stop_the_stream() -> Result<()> {
        let events = EnvironmentEvents::new(16);
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
            fail: true,
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        let consumer = events.spawn_consumer(handler.clone(), shutdown_rx);

        let env = EnvironmentBuilder::default()
            .name("python".to_string())
            .namespace("ns".to_string())
            .uid("u1".to_string())
            .resource_version("1".to_string())
            .build()?;
        let tx = events.sender();
        tx.send(EnvironmentEvent::Created(env.clone())).unwrap();
        tx.send(EnvironmentEvent::Deleted(env)).unwrap();
        drop(tx);
        drop(events);

        consumer.await?;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
