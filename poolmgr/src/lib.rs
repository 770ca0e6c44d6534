//! Warm-pod pools and the reconcilers that keep them converged with their
//! environments.

pub mod events;
pub mod pool;
pub mod pool_manager;
pub mod pool_reconciler;
pub mod specialized_pods;

pub use events::{EnvironmentEvent, EnvironmentEventHandler, EnvironmentEvents};
pub use pool::GenericPool;
pub use pool_manager::GenericPoolManager;
pub use pool_reconciler::PoolReconciler;
pub use specialized_pods::SpecializedPodReconciler;
