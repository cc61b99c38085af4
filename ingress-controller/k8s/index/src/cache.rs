use crate::k8s::{self, ResourceExt, ResourceId};
use std::{collections::BTreeMap, sync::Arc};

/// A read-only mirror of one resource kind, ordered by namespace and name.
///
/// Cluster-scoped resources are stored under the empty namespace.
#[derive(Debug)]
pub struct Store<T> {
    items: BTreeMap<ResourceId, Arc<T>>,
    synced: bool,
}

/// The mirrored state of every resource kind the controller reads.
#[derive(Debug, Default)]
pub struct Cache {
    pub ingresses: Store<k8s::Ingress>,
    pub services: Store<k8s::Service>,
    pub endpoints: Store<k8s::Endpoints>,
    pub secrets: Store<k8s::Secret>,
    pub config_maps: Store<k8s::ConfigMap>,
    pub pods: Store<k8s::Pod>,
    pub nodes: Store<k8s::Node>,
}

// === impl Cache ===

impl Cache {
    /// Returns true once every store has received its initial listing.
    pub fn has_synced(&self) -> bool {
        self.ingresses.has_synced()
            && self.services.has_synced()
            && self.endpoints.has_synced()
            && self.secrets.has_synced()
            && self.config_maps.has_synced()
            && self.pods.has_synced()
            && self.nodes.has_synced()
    }
}

// === impl Store ===

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            synced: false,
        }
    }
}

impl<T> Store<T> {
    /// Iterates over all resources in namespace/name order.
    pub fn list(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.items.values()
    }

    /// Iterates over the resources of one namespace in name order.
    pub fn list_namespace<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Arc<T>> {
        self.items
            .range(ResourceId::new(namespace, "")..)
            .take_while(move |(id, _)| id.namespace == namespace)
            .map(|(_, item)| item)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Arc<T>> {
        self.items.get(id)
    }

    /// Looks up a resource by its `namespace/name` key.
    pub fn get_by_key(&self, key: &str) -> Option<&Arc<T>> {
        let id = key.parse::<ResourceId>().ok()?;
        self.items.get(&id)
    }

    pub fn has_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn insert_arc(&mut self, id: ResourceId, resource: Arc<T>) -> Option<Arc<T>> {
        self.items.insert(id, resource)
    }

    pub(crate) fn remove(&mut self, id: &ResourceId) -> Option<Arc<T>> {
        self.items.remove(id)
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced = true;
    }
}

impl<T: ResourceExt> Store<T> {
    /// Stores a resource, returning the version it replaced.
    pub(crate) fn insert(&mut self, resource: T) -> Option<Arc<T>> {
        let namespace = resource.namespace().unwrap_or_default();
        let id = ResourceId::new(namespace, resource.name_unchecked());
        self.insert_arc(id, Arc::new(resource))
    }
}
