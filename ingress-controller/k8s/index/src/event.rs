use crate::k8s;
use std::sync::Arc;

/// A change to one mirrored resource.
#[derive(Clone, Debug)]
pub enum Notification {
    Ingress(Change<k8s::Ingress>),
    Service(Change<k8s::Service>),
    Endpoints(Change<k8s::Endpoints>),
    Secret(Change<k8s::Secret>),
    ConfigMap(Change<k8s::ConfigMap>),
    Pod(Change<k8s::Pod>),
    Node(Change<k8s::Node>),
}

#[derive(Clone, Debug)]
pub enum Change<T> {
    Applied { old: Option<Arc<T>>, new: Arc<T> },
    Deleted(Deleted<T>),
}

#[derive(Clone, Debug)]
pub enum Deleted<T> {
    /// Observed as a delete event.
    Known(Arc<T>),

    /// Missing from a re-list; this is the last state the mirror saw.
    LastKnown(Arc<T>),
}

// === impl Notification ===

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ingress(_) => "Ingress",
            Self::Service(_) => "Service",
            Self::Endpoints(_) => "Endpoints",
            Self::Secret(_) => "Secret",
            Self::ConfigMap(_) => "ConfigMap",
            Self::Pod(_) => "Pod",
            Self::Node(_) => "Node",
        }
    }
}

// === impl Change ===

impl<T: PartialEq> Change<T> {
    /// Describes an apply, or returns `None` if the object did not change.
    pub fn applied(old: Option<Arc<T>>, new: Arc<T>) -> Option<Self> {
        if old.as_deref() == Some(&*new) {
            return None;
        }
        Some(Self::Applied { old, new })
    }
}

impl<T> Change<T> {
    /// Iterates over every version of the object this change involves.
    pub fn objects(&self) -> impl Iterator<Item = &T> {
        let (a, b) = match self {
            Self::Applied { old, new } => (old.as_deref(), Some(&**new)),
            Self::Deleted(Deleted::Known(obj) | Deleted::LastKnown(obj)) => (Some(&**obj), None),
        };
        a.into_iter().chain(b)
    }
}
