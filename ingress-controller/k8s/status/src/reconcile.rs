use crate::{
    address::{self, AddressError},
    StatusApi, StatusMetrics,
};
use h2_ingress_k8s_api::{
    self as k8s, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus, Labels,
    ResourceId, Selector,
};
use h2_ingress_k8s_index::{Cache, SharedIndex};
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;

const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const REMOVAL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct StatusConfig {
    /// This controller's own pod.
    pub pod: ResourceId,

    /// When set, its addresses are published instead of those of the controller pods.
    pub publish_service: Option<ResourceId>,

    pub allow_internal_ip: bool,

    /// Base interval between syncs. Each wait adds up to the same amount of jitter.
    pub interval: Duration,
}

/// Publishes the controller's addresses into the status of every Ingress it serves.
pub struct Reconciler<A> {
    index: SharedIndex,
    api: A,
    config: StatusConfig,
    metrics: StatusMetrics,
}

enum Removal {
    Done,
    Retry,
    Gone,
}

// === impl Reconciler ===

impl<A: StatusApi> Reconciler<A> {
    pub fn new(index: SharedIndex, api: A, config: StatusConfig, metrics: StatusMetrics) -> Self {
        Self {
            index,
            api,
            config,
            metrics,
        }
    }

    /// Syncs status until `shutdown` fires, then withdraws this replica's address.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if let Err(error) = self.sync(&shutdown).await {
                tracing::warn!(%error, "Could not update Ingress status");
            }

            let wait = self.config.interval.mul_f64(1.0 + rand::random::<f64>());
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = time::sleep(wait) => {}
            }
        }

        if self.config.publish_service.is_some() {
            return;
        }
        if let Err(error) = self.remove_own_address().await {
            tracing::warn!(%error, "Could not remove address from Ingress status");
        }
    }

    /// Writes the current set of addresses to every in-scope Ingress that lacks it.
    pub async fn sync(&self, shutdown: &CancellationToken) -> Result<(), AddressError> {
        let (addresses, ingresses) = {
            let index = self.index.read();
            let addresses = self.advertised_addresses(index.cache())?;
            let ingresses = in_scope(&index);
            (addresses, ingresses)
        };

        for ingress in ingresses {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            if address::same_addresses(current_addresses(&ingress), &addresses) {
                continue;
            }

            let mut updated = (*ingress).clone();
            set_addresses(&mut updated, addresses.clone());
            let ns = updated.metadata.namespace.as_deref().unwrap_or_default();
            let name = updated.metadata.name.as_deref().unwrap_or_default();
            match self.api.update_status(&updated).await {
                Ok(_) => {
                    tracing::debug!(ns, name, "Updated status");
                    self.metrics.updated();
                }
                Err(error) => {
                    tracing::warn!(ns, name, %error, "Failed to update status");
                    self.metrics.failed();
                }
            }
        }
        Ok(())
    }

    fn advertised_addresses(
        &self,
        cache: &Cache,
    ) -> Result<Vec<IngressLoadBalancerIngress>, AddressError> {
        if let Some(id) = self.config.publish_service.as_ref() {
            let svc = cache
                .services
                .get(id)
                .ok_or_else(|| AddressError::ServiceNotFound(id.clone()))?;
            return Ok(address::service_addresses(svc));
        }

        let pod = self.own_pod(cache)?;
        let selector = Selector::from(pod.metadata.labels.as_ref());
        let mut addresses = Vec::new();
        for peer in cache.pods.list_namespace(&self.config.pod.namespace) {
            // Without labels there is nothing to tell replicas apart by.
            let selected = if selector.is_empty() {
                peer.metadata.name == pod.metadata.name
            } else {
                selector.matches(&Labels::from(peer.metadata.labels.as_ref()))
            };
            if !selected {
                continue;
            }
            match address::pod_address(cache, peer, self.config.allow_internal_ip) {
                Ok(addr) => addresses.push(address::load_balancer_ingress(&addr)),
                Err(error) => tracing::info!(%error, "Skipping pod"),
            }
        }
        address::normalize(&mut addresses);
        Ok(addresses)
    }

    fn own_pod<'c>(&self, cache: &'c Cache) -> Result<&'c Arc<k8s::Pod>, AddressError> {
        cache
            .pods
            .get(&self.config.pod)
            .ok_or_else(|| AddressError::PodNotFound(self.config.pod.clone()))
    }

    /// Removes this replica's address from every in-scope Ingress, leaving other replicas'
    /// addresses in place.
    async fn remove_own_address(&self) -> Result<(), AddressError> {
        let (address, ingresses) = {
            let index = self.index.read();
            let pod = self.own_pod(index.cache())?;
            let address =
                address::pod_address(index.cache(), pod, self.config.allow_internal_ip)?;
            let ingresses = in_scope(&index)
                .iter()
                .filter_map(|ing| ResourceId::of(&**ing))
                .collect::<Vec<_>>();
            (address, ingresses)
        };
        tracing::info!(%address, "Removing address from Ingress status");

        for id in ingresses {
            let removal = time::timeout(REMOVAL_TIMEOUT, async {
                let mut poll = time::interval(REMOVAL_POLL_INTERVAL);
                loop {
                    poll.tick().await;
                    match self.try_remove(&id, &address).await {
                        Removal::Retry => continue,
                        Removal::Done => return true,
                        Removal::Gone => return false,
                    }
                }
            });
            match removal.await {
                Ok(true) => {}
                Ok(false) => tracing::info!(ingress = %id, "Ingress no longer exists"),
                Err(_) => tracing::warn!(ingress = %id, "Timed out removing address"),
            }
        }
        Ok(())
    }

    async fn try_remove(&self, id: &ResourceId, address: &str) -> Removal {
        let mut ingress = match self.api.get(id).await {
            Ok(Some(ingress)) => ingress,
            Ok(None) => return Removal::Gone,
            Err(error) => {
                tracing::warn!(ingress = %id, %error, "Failed to get Ingress");
                return Removal::Retry;
            }
        };

        let old = current_addresses(&ingress);
        if old.is_empty() {
            return Removal::Done;
        }
        let new = old
            .iter()
            .filter(|entry| !address::matches(entry, address))
            .cloned()
            .collect::<Vec<_>>();
        if new.len() == old.len() {
            return Removal::Done;
        }

        set_addresses(&mut ingress, new);
        match self.api.update_status(&ingress).await {
            Ok(_) => {
                self.metrics.updated();
                Removal::Done
            }
            Err(error) => {
                tracing::warn!(ingress = %id, %error, "Failed to update status");
                self.metrics.failed();
                Removal::Retry
            }
        }
    }
}

fn in_scope(index: &h2_ingress_k8s_index::Index) -> Vec<Arc<k8s::Ingress>> {
    index
        .cache()
        .ingresses
        .list()
        .filter(|ing| index.config().class_in_scope(ing))
        .cloned()
        .collect()
}

fn current_addresses(ingress: &k8s::Ingress) -> &[IngressLoadBalancerIngress] {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_deref())
        .unwrap_or_default()
}

fn set_addresses(ingress: &mut k8s::Ingress, addresses: Vec<IngressLoadBalancerIngress>) {
    ingress.status = Some(IngressStatus {
        load_balancer: Some(IngressLoadBalancerStatus {
            ingress: Some(addresses),
        }),
    });
}
