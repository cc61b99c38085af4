use crate::{
    k8s::{self, Labels, ResourceExt, ResourceId, Selector},
    Cache, Config, Notification,
};

/// Decides whether a change can affect the proxy configuration.
///
/// Both the previous and the current version of an updated object are considered, so an object
/// that stops being referenced still triggers one last recompute.
pub fn is_relevant(cache: &Cache, config: &Config, notification: &Notification) -> bool {
    match notification {
        Notification::Ingress(change) => change.objects().any(|ing| config.class_in_scope(ing)),
        Notification::Endpoints(change) => change
            .objects()
            .any(|ep| endpoints_referenced(cache, config, ep)),
        Notification::Secret(change) => change
            .objects()
            .any(|secret| secret_referenced(cache, config, secret)),
        Notification::Pod(change) => change.objects().any(|pod| pod_referenced(cache, config, pod)),
        Notification::ConfigMap(change) => change.objects().any(|cm| {
            config.proxy_config_map.is_some() && config.proxy_config_map == ResourceId::of(cm)
        }),
        // Services and nodes are read during resolution, but their changes reach the proxy
        // through the Endpoints and Pods that follow them.
        Notification::Service(_) | Notification::Node(_) => false,
    }
}

/// Iterates over the in-scope Ingresses of a namespace.
pub(crate) fn ingresses_in<'a>(
    cache: &'a Cache,
    config: &'a Config,
    namespace: &'a str,
) -> impl Iterator<Item = &'a k8s::Ingress> {
    cache
        .ingresses
        .list_namespace(namespace)
        .map(|ing| &**ing)
        .filter(|ing| config.class_in_scope(ing))
}

/// Iterates over the names of every Service an Ingress routes to.
pub(crate) fn backend_services(ingress: &k8s::Ingress) -> impl Iterator<Item = &str> {
    let spec = ingress.spec.as_ref();
    let default = spec.and_then(|s| s.default_backend.as_ref());
    let rules = spec
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|rule| rule.http.as_ref())
        .flat_map(|http| http.paths.iter())
        .map(|path| &path.backend);
    default
        .into_iter()
        .chain(rules)
        .filter_map(|backend| backend.service.as_ref())
        .map(|svc| svc.name.as_str())
}

/// Iterates over the names of the Secrets an Ingress terminates TLS with.
pub(crate) fn tls_secrets(ingress: &k8s::Ingress) -> impl Iterator<Item = &str> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.tls.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|tls| tls.secret_name.as_deref())
}

fn endpoints_referenced(cache: &Cache, config: &Config, ep: &k8s::Endpoints) -> bool {
    let Some(id) = ResourceId::of(ep) else {
        return false;
    };
    if id == config.default_backend_service {
        return true;
    }
    let referenced = ingresses_in(cache, config, &id.namespace)
        .any(|ing| backend_services(ing).any(|svc| svc == id.name));
    referenced
}

fn secret_referenced(cache: &Cache, config: &Config, secret: &k8s::Secret) -> bool {
    let Some(id) = ResourceId::of(secret) else {
        return false;
    };
    if config.default_tls_secret.as_ref() == Some(&id) {
        return true;
    }
    let referenced = ingresses_in(cache, config, &id.namespace)
        .any(|ing| tls_secrets(ing).any(|name| name == id.name));
    referenced
}

fn pod_referenced(cache: &Cache, config: &Config, pod: &k8s::Pod) -> bool {
    let Some(namespace) = pod.namespace() else {
        return false;
    };
    let labels = Labels::from(pod.metadata.labels.as_ref());

    let selects = |id: &ResourceId| match cache.services.get(id) {
        Some(svc) => service_selector(svc).matches(&labels),
        None => {
            tracing::debug!(service = %id, "Service not found");
            false
        }
    };

    if namespace == config.default_backend_service.namespace
        && selects(&config.default_backend_service)
    {
        return true;
    }

    let referenced = ingresses_in(cache, config, &namespace).any(|ing| {
        backend_services(ing).any(|svc| selects(&ResourceId::new(namespace.as_str(), svc)))
    });
    referenced
}

pub(crate) fn service_selector(svc: &k8s::Service) -> Selector {
    Selector::from(svc.spec.as_ref().and_then(|spec| spec.selector.as_ref()))
}
