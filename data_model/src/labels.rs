//! Label and annotation contract for pods managed by the pool engine.
//!
//! The specialized-pod selector built from these keys is the only mechanism
//! for finding a retiring environment's specialized pods, so the keys and
//! values here must stay stable across versions.

use std::collections::BTreeMap;

use crate::EnvironmentRef;

pub const EXECUTOR_TYPE: &str = "executor-type";
pub const EXECUTOR_TYPE_POOL_MANAGER: &str = "pool-manager";
pub const ENVIRONMENT_NAME: &str = "environment-name";
pub const ENVIRONMENT_NAMESPACE: &str = "environment-namespace";
pub const ENVIRONMENT_UID: &str = "environment-uid";
/// "true" while the pod is part of a warm pool, "false" once specialized.
pub const MANAGED: &str = "managed";

/// Annotation carrying the function-service cache key of a specialized pod.
pub const FUNCTION_SERVICE_KEY: &str = "fnpool.dev/function-service-key";

fn environment_labels(env: &EnvironmentRef) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        EXECUTOR_TYPE.to_string(),
        EXECUTOR_TYPE_POOL_MANAGER.to_string(),
    );
    labels.insert(ENVIRONMENT_NAME.to_string(), env.name.clone());
    labels.insert(ENVIRONMENT_NAMESPACE.to_string(), env.namespace.clone());
    labels.insert(ENVIRONMENT_UID.to_string(), env.uid.clone());
    labels
}

/// Labels carried by warm pods, and the match labels of the pool deployment.
pub fn managed_pod_labels(env: &EnvironmentRef) -> BTreeMap<String, String> {
    let mut labels = environment_labels(env);
    labels.insert(MANAGED.to_string(), "true".to_string());
    labels
}

/// Labels carried by pods that have been specialized out of a pool. Also the
/// selector used to enumerate them when their environment goes away.
pub fn specialized_pod_labels(env: &EnvironmentRef) -> BTreeMap<String, String> {
    let mut labels = environment_labels(env);
    labels.insert(MANAGED.to_string(), "false".to_string());
    labels
}
