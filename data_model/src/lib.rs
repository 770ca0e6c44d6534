pub mod labels;

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

/// Identity of an environment: the registry key for pools and the tag
/// carried by every specialized pod and function-service binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct EnvironmentRef {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl EnvironmentRef {
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.namespace, self.name, self.uid)
    }
}

impl Display for EnvironmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Runtime spec an environment declares. Opaque to the pool engine beyond
/// being handed to the warm deployment's pod template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RuntimeSpec {
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: Option<String>,
}

/// A user-declared runtime environment, as carried by cluster notifications.
/// Created, updated and deleted only by the external control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder, Default)]
pub struct Environment {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    /// Version token from the control plane; changes with every accepted
    /// write. Equal tokens mean a duplicate notification.
    pub resource_version: String,
    #[builder(default)]
    pub pool_size: u32,
    #[builder(default)]
    pub runtime: RuntimeSpec,
}

impl Environment {
    pub fn reference(&self) -> EnvironmentRef {
        EnvironmentRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            uid: self.uid.clone(),
        }
    }
}

/// Lifecycle of a pod managed by this engine. Transitions are forward-only;
/// Specialized and Deleting are terminal for a given pod instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
pub enum PodState {
    Warm,
    Specializing,
    Specialized,
    Deleting,
}

impl PodState {
    pub fn may_become(&self, next: PodState) -> bool {
        matches!(
            (self, next),
            (PodState::Warm, PodState::Specializing) |
                (PodState::Specializing, PodState::Specialized) |
                (PodState::Warm, PodState::Deleting) |
                (PodState::Specializing, PodState::Deleting) |
                (PodState::Specialized, PodState::Deleting)
        )
    }
}

/// A pod as observed through the cluster API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    /// Pod IP; absent until the cluster has assigned one.
    pub address: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl PodInfo {
    /// Key under which a specialized pod's binding lives in the function
    /// service cache. Specialization stamps the key onto the pod as an
    /// annotation; the name-prefix split only covers pods written before the
    /// annotation existed.
    pub fn cache_key(&self) -> String {
        if let Some(key) = self.annotations.get(labels::FUNCTION_SERVICE_KEY) {
            return key.clone();
        }
        self.name
            .split('.')
            .next()
            .unwrap_or(&self.name)
            .to_string()
    }
}

/// Identity of a function, independent of any pod serving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct FunctionRef {
    pub name: String,
    pub namespace: String,
}

impl FunctionRef {
    pub fn key(&self) -> String {
        format!("{}|{}", self.namespace, self.name)
    }
}

impl Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Live binding of a function to one specialized pod's address, tagged with
/// the environment it was created against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
pub struct FuncSvc {
    pub function: FunctionRef,
    pub environment: EnvironmentRef,
    pub pod_name: String,
    /// Cache key for the pod-keyed index; also stamped onto the pod as an
    /// annotation at specialization time.
    pub pod_key: String,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use crate::{labels, EnvironmentBuilder, PodInfo, PodState};

    #[test]
    fn test_environment_reference_identity() {
        let env = EnvironmentBuilder::default()
            .name("python".to_string())
            .namespace("ns".to_string())
            .uid("u1".to_string())
            .resource_version("1".to_string())
            .pool_size(3u32)
            .build()
            .unwrap();

        let env_ref = env.reference();
        assert_eq!(env_ref.key(), "ns|python|u1");
        assert_eq!(env_ref.to_string(), "ns/python");
    }

    #[test]
    fn test_cache_key_prefers_annotation() {
        let mut pod = PodInfo {
            name: "poolmgr-python-abc123.xyz".to_string(),
            namespace: "ns".to_string(),
            ..Default::default()
        };
        assert_eq!(pod.cache_key(), "poolmgr-python-abc123");

        pod.annotations.insert(
            labels::FUNCTION_SERVICE_KEY.to_string(),
            "explicit-key".to_string(),
        );
        assert_eq!(pod.cache_key(), "explicit-key");
    }

    #[test]
    fn test_pod_state_transitions_are_forward_only() {
        assert!(PodState::Warm.may_become(PodState::Specializing));
        assert!(PodState::Specializing.may_become(PodState::Specialized));
        assert!(PodState::Specialized.may_become(PodState::Deleting));
        assert!(!PodState::Specialized.may_become(PodState::Warm));
        assert!(!PodState::Deleting.may_become(PodState::Warm));
        assert!(!PodState::Specializing.may_become(PodState::Warm));
    }
}
