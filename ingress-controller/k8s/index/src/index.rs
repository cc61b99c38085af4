use crate::{
    cache::Store,
    k8s::{self, ResourceExt, ResourceId},
    reference, Cache, Change, Config, Deleted, IndexMetrics, Notification,
};
use h2_ingress_core::queue;
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Owns the mirror and requests a recompute whenever a relevant resource changes.
#[derive(Debug)]
pub struct Index {
    config: Arc<Config>,
    cache: Cache,
    queue: queue::Handle,
    metrics: IndexMetrics,
}

// === impl Index ===

impl Index {
    pub fn shared(config: Arc<Config>, queue: queue::Handle, metrics: IndexMetrics) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            config,
            cache: Cache::default(),
            queue,
            metrics,
        }))
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn has_synced(&self) -> bool {
        self.cache.has_synced()
    }

    fn notify(&self, notification: Notification) {
        if reference::is_relevant(&self.cache, &self.config, &notification) {
            tracing::debug!(kind = notification.kind(), "Requesting recompute");
            self.metrics.recompute(notification.kind());
            self.queue.enqueue();
        }
    }
}

/// Applies a namespaced or cluster-scoped resource to its store.
fn apply<T>(store: &mut Store<T>, resource: T) -> Option<Change<T>>
where
    T: ResourceExt + PartialEq,
{
    let namespace = resource.namespace().unwrap_or_default();
    let id = ResourceId::new(namespace, resource.name_unchecked());
    let new = Arc::new(resource);
    let old = store.get(&id).cloned();
    let change = Change::applied(old, new.clone())?;
    store.insert_arc(id, new);
    Some(change)
}

fn delete<T>(
    store: &mut Store<T>,
    id: &ResourceId,
    deleted: fn(Arc<T>) -> Deleted<T>,
) -> Option<Change<T>> {
    store.remove(id).map(|obj| Change::Deleted(deleted(obj)))
}

macro_rules! index_namespaced {
    ($ty:ty, $store:ident, $variant:ident) => {
        impl IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                self.metrics.apply(stringify!($variant));
                if let Some(change) = apply(&mut self.cache.$store, resource) {
                    self.notify(Notification::$variant(change));
                }
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.metrics.delete(stringify!($variant));
                let id = ResourceId::new(namespace, name);
                if let Some(change) = delete(&mut self.cache.$store, &id, Deleted::Known) {
                    self.notify(Notification::$variant(change));
                }
            }

            fn reset(&mut self, resources: Vec<$ty>, removed: NamespacedRemoved) {
                self.metrics.reset(stringify!($variant));
                let mut changes = resources
                    .into_iter()
                    .filter_map(|resource| apply(&mut self.cache.$store, resource))
                    .collect::<Vec<_>>();
                for (namespace, names) in removed {
                    for name in names {
                        let id = ResourceId::new(namespace.as_str(), name);
                        changes.extend(delete(&mut self.cache.$store, &id, Deleted::LastKnown));
                    }
                }
                self.cache.$store.mark_synced();

                let relevant = changes.into_iter().any(|change| {
                    let notification = Notification::$variant(change);
                    reference::is_relevant(&self.cache, &self.config, &notification)
                });
                if relevant {
                    self.metrics.recompute(stringify!($variant));
                    self.queue.enqueue();
                }
            }
        }
    };
}

index_namespaced!(k8s::Ingress, ingresses, Ingress);
index_namespaced!(k8s::Service, services, Service);
index_namespaced!(k8s::Endpoints, endpoints, Endpoints);
index_namespaced!(k8s::Secret, secrets, Secret);
index_namespaced!(k8s::ConfigMap, config_maps, ConfigMap);
index_namespaced!(k8s::Pod, pods, Pod);

impl IndexClusterResource<k8s::Node> for Index {
    fn apply(&mut self, node: k8s::Node) {
        self.metrics.apply("Node");
        if let Some(change) = apply(&mut self.cache.nodes, node) {
            self.notify(Notification::Node(change));
        }
    }

    fn delete(&mut self, name: String) {
        self.metrics.delete("Node");
        let id = ResourceId::new("", name);
        if let Some(change) = delete(&mut self.cache.nodes, &id, Deleted::Known) {
            self.notify(Notification::Node(change));
        }
    }

    fn reset(&mut self, nodes: Vec<k8s::Node>, removed: ClusterRemoved) {
        self.metrics.reset("Node");
        for node in nodes {
            apply(&mut self.cache.nodes, node);
        }
        for name in removed {
            self.cache.nodes.remove(&ResourceId::new("", name));
        }
        // Node changes never affect the proxy configuration on their own.
        self.cache.nodes.mark_synced();
    }
}
