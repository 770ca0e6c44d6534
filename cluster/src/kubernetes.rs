use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use data_model::PodInfo;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{Container, Pod, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use serde_json::json;
use tracing::debug;

use crate::{selector_string, ClusterOps, PoolDeployment};

const RUNTIME_CONTAINER: &str = "runtime";

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient kubeconfig or in-cluster service
    /// account, whichever is available.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("error building kubernetes client")?;
        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

fn pod_info(pod: Pod) -> Option<PodInfo> {
    let name = pod.metadata.name.clone()?;
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let address = pod.status.as_ref().and_then(|status| status.pod_ip.clone());
    Some(PodInfo {
        name,
        namespace,
        address,
        labels: pod.metadata.labels.unwrap_or_default(),
        annotations: pod.metadata.annotations.unwrap_or_default(),
    })
}

fn deployment_manifest(deployment: &PoolDeployment) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment.name.clone()),
            namespace: Some(deployment.namespace.clone()),
            labels: Some(deployment.selector.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(deployment.replicas),
            selector: LabelSelector {
                match_labels: Some(deployment.selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(deployment.selector.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: RUNTIME_CONTAINER.to_string(),
                        image: Some(deployment.image.clone()),
                        image_pull_policy: deployment.image_pull_policy.clone(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        let params = ListParams::default().labels(&selector_string(selector));
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .context("error listing pods")?;
        Ok(pods.items.into_iter().filter_map(pod_info).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => {
                debug!(pod = name, "pod already gone");
                Ok(())
            }
            Err(err) => Err(err).context("error deleting pod"),
        }
    }

    async fn patch_pod_meta(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let patch = json!({
            "metadata": {
                "labels": labels,
                "annotations": annotations,
            }
        });
        self.pods(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .context("error patching pod metadata")?;
        Ok(())
    }

    async fn upsert_deployment(&self, deployment: PoolDeployment) -> Result<()> {
        let manifest = deployment_manifest(&deployment);
        let api = self.deployments(&deployment.namespace);
        match api.create(&PostParams::default(), &manifest).await {
            Ok(_) => Ok(()),
            Err(err) if is_already_exists(&err) => {
                api.patch(
                    &deployment.name,
                    &PatchParams::default(),
                    &Patch::Strategic(&manifest),
                )
                .await
                .context("error patching existing pool deployment")?;
                Ok(())
            }
            Err(err) => Err(err).context("error creating pool deployment"),
        }
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        image: &str,
    ) -> Result<()> {
        let patch = json!({
            "spec": {
                "replicas": replicas,
                "template": {
                    "spec": {
                        "containers": [
                            { "name": RUNTIME_CONTAINER, "image": image }
                        ]
                    }
                }
            }
        });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .context("error patching pool deployment")?;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => {
                debug!(deployment = name, "deployment already gone");
                Ok(())
            }
            Err(err) => Err(err).context("error deleting pool deployment"),
        }
    }
}
