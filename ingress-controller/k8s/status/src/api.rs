use anyhow::Result;
use h2_ingress_k8s_api::{self as k8s, ResourceExt, ResourceId};
use std::sync::Arc;

const FIELD_MANAGER: &str = "h2-ingress-controller";

/// Reads and writes Ingress status records.
#[async_trait::async_trait]
pub trait StatusApi: Send + Sync {
    /// Fetches the current Ingress, or `None` if it no longer exists.
    async fn get(&self, id: &ResourceId) -> Result<Option<k8s::Ingress>>;

    /// Replaces the Ingress' status with the one it carries.
    async fn update_status(&self, ingress: &k8s::Ingress) -> Result<k8s::Ingress>;
}

/// Talks to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStatusApi {
    client: k8s::Client,
}

impl KubeStatusApi {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusApi for KubeStatusApi {
    async fn get(&self, id: &ResourceId) -> Result<Option<k8s::Ingress>> {
        let api = k8s::Api::<k8s::Ingress>::namespaced(self.client.clone(), &id.namespace);
        Ok(api.get_opt(&id.name).await?)
    }

    async fn update_status(&self, ingress: &k8s::Ingress) -> Result<k8s::Ingress> {
        let namespace = ingress
            .namespace()
            .ok_or_else(|| anyhow::anyhow!("Ingress {} has no namespace", ingress.name_any()))?;
        let api = k8s::Api::<k8s::Ingress>::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": ingress.status });
        let updated = api
            .patch_status(
                &ingress.name_any(),
                &k8s::PatchParams::apply(FIELD_MANAGER),
                &k8s::Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl<A: StatusApi + ?Sized> StatusApi for Arc<A> {
    async fn get(&self, id: &ResourceId) -> Result<Option<k8s::Ingress>> {
        (**self).get(id).await
    }

    async fn update_status(&self, ingress: &k8s::Ingress) -> Result<k8s::Ingress> {
        (**self).update_status(ingress).await
    }
}
