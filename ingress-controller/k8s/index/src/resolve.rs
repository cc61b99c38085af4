use crate::{
    k8s::{
        self,
        annotations::{BackendConfigMapper, PathConfigMapper, PortBackendConfig},
        IntOrString, Labels, ResourceExt, ResourceId,
    },
    reference, Cache, Config, TlsError, TlsResolver,
};
use h2_ingress_core::{
    Affinity, IngressConfig, Protocol, TlsCred, Upstream, UpstreamServer, DEFAULT_HOST,
    DEFAULT_PATH,
};
use std::collections::{btree_map::Entry, BTreeMap};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("default TLS secret {secret} cannot be used")]
    DefaultTlsSecret {
        secret: ResourceId,
        #[source]
        source: TlsError,
    },
}

/// Builds a complete proxy configuration from the mirrored cluster state.
///
/// A broken Ingress, Service, or Secret only removes the routes that depend on it. The pass as a
/// whole fails only if the configured default TLS secret is unusable.
pub fn resolve(cache: &Cache, config: &Config) -> Result<IngressConfig, ResolveError> {
    let tls = TlsResolver::new(&config.conf_dir);
    let mut model = IngressConfig::default();

    if let Some(secret) = config.default_tls_secret.as_ref() {
        let cred = tls
            .resolve_id(&cache.secrets, secret)
            .map_err(|source| ResolveError::DefaultTlsSecret {
                secret: secret.clone(),
                source,
            })?;
        model.tls = true;
        model.default_tls_cred = Some(cred);
    }

    let mut creds = Vec::new();
    let mut upstreams = BTreeMap::<String, Upstream>::new();
    for ingress in cache.ingresses.list() {
        if !config.class_in_scope(ingress) {
            continue;
        }
        let Some(id) = ResourceId::of(&**ingress) else {
            continue;
        };
        let _span = tracing::debug_span!("ingress", ns = %id.namespace, name = %id.name).entered();

        let ingress_creds = match resolve_ingress_tls(&tls, cache, &id, ingress) {
            Ok(creds) => creds,
            Err(error) => {
                tracing::warn!(%error, "Ingress disabled: its TLS secret cannot be used");
                continue;
            }
        };
        let require_tls = !ingress_creds.is_empty() || config.default_tls_secret.is_some();
        creds.extend(ingress_creds);

        for upstream in ingress_upstreams(cache, &id, ingress, require_tls) {
            match upstreams.entry(upstream.name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(upstream);
                }
                Entry::Occupied(mut entry) => {
                    entry.get_mut().backends.extend(upstream.backends);
                }
            }
        }
    }

    let mut upstreams = unique_patterns(upstreams);
    if !upstreams.iter().any(Upstream::is_default) {
        upstreams.push(default_upstream(cache, config));
        upstreams.sort_by(|a, b| a.name.cmp(&b.name));
    }

    model.upstreams = upstreams
        .into_iter()
        .map(|mut upstream| {
            upstream.normalize_backends();
            upstream
        })
        .collect();

    creds.sort_by(|a, b| a.name.cmp(&b.name));
    creds.dedup_by(|b, a| a.name == b.name);
    match model.default_tls_cred.as_ref() {
        Some(default) => creds.retain(|cred| cred.name != default.name),
        None if !creds.is_empty() => {
            model.tls = true;
            model.default_tls_cred = Some(creds.remove(0));
        }
        None => {}
    }
    model.sub_tls_creds = creds;

    Ok(model)
}

/// Keeps one upstream per host and path: the first by name. The proxy cannot route a single
/// pattern to more than one upstream.
fn unique_patterns(upstreams: BTreeMap<String, Upstream>) -> Vec<Upstream> {
    let mut patterns = BTreeMap::<(String, String), String>::new();
    let mut unique = Vec::with_capacity(upstreams.len());
    for upstream in upstreams.into_values() {
        match patterns.entry((upstream.host.clone(), upstream.path.clone())) {
            Entry::Vacant(entry) => {
                entry.insert(upstream.name.clone());
                unique.push(upstream);
            }
            Entry::Occupied(entry) => {
                tracing::warn!(
                    upstream = %upstream.name,
                    kept = %entry.get(),
                    "Ignoring upstream for an already routed host and path"
                );
            }
        }
    }
    unique
}

fn resolve_ingress_tls(
    tls: &TlsResolver,
    cache: &Cache,
    id: &ResourceId,
    ingress: &k8s::Ingress,
) -> Result<Vec<TlsCred>, TlsError> {
    reference::tls_secrets(ingress)
        .map(|name| tls.resolve_id(&cache.secrets, &ResourceId::new(id.namespace.as_str(), name)))
        .collect()
}

fn ingress_upstreams(
    cache: &Cache,
    id: &ResourceId,
    ingress: &k8s::Ingress,
    require_tls: bool,
) -> Vec<Upstream> {
    let Some(spec) = ingress.spec.as_ref() else {
        return vec![];
    };

    let backend_configs =
        BackendConfigMapper::from_annotations(ingress.annotations()).unwrap_or_else(|error| {
            tracing::warn!(%error, "Ignoring backend configuration");
            BackendConfigMapper::default()
        });
    let path_configs =
        PathConfigMapper::from_annotations(ingress.annotations()).unwrap_or_else(|error| {
            tracing::warn!(%error, "Ignoring path configuration");
            PathConfigMapper::default()
        });

    let rules = spec.rules.iter().flatten().flat_map(|rule| {
        let host = rule.host.as_deref().unwrap_or(DEFAULT_HOST);
        rule.http.iter().flat_map(move |http| {
            http.paths
                .iter()
                .map(move |p| (host, p.path.as_deref().unwrap_or(""), &p.backend))
        })
    });
    let default = spec
        .default_backend
        .as_ref()
        .map(|backend| (DEFAULT_HOST, DEFAULT_PATH, backend));

    let mut upstreams = Vec::new();
    for (host, path, backend) in rules.chain(default) {
        let path = if path.is_empty() {
            DEFAULT_PATH
        } else if path.starts_with('/') {
            path
        } else {
            tracing::info!(host, path, "Skipping path that does not start with /");
            continue;
        };

        let Some(backend) = backend.service.as_ref() else {
            tracing::debug!(host, path, "Skipping backend that is not a Service");
            continue;
        };
        let Some(port) = backend.port.as_ref().and_then(|port| {
            port.number
                .map(|n| n.to_string())
                .or_else(|| port.name.clone())
        }) else {
            tracing::warn!(host, path, service = %backend.name, "Backend has no port");
            continue;
        };

        let svc_id = ResourceId::new(id.namespace.as_str(), backend.name.as_str());
        let Some(svc) = cache.services.get(&svc_id) else {
            tracing::warn!(service = %svc_id, "Service not found");
            continue;
        };

        let backend_config = backend_configs.config_for(&backend.name, &port);
        let template = server_template(&backend_config, &svc_id, &port);
        let backends = service_backends(cache, svc, &svc_id, &port, &template);
        if backends.is_empty() {
            tracing::warn!(service = %svc_id, %port, "Service has no active endpoints");
            continue;
        }

        let path_config = path_configs.config_for(host, path);
        upstreams.push(Upstream {
            // Mirrors the proxy's backend syntax: `<service>,<port>;<pattern>`.
            name: format!("{}/{},{};{}{}", id.namespace, backend.name, port, host, path),
            host: host.to_string(),
            path: path.to_string(),
            redirect_if_not_tls: require_tls && path_config.redirect_if_not_tls.unwrap_or(true),
            read_timeout: path_config.read_timeout.map(Into::into),
            write_timeout: path_config.write_timeout.map(Into::into),
            backends,
        });
    }
    upstreams
}

fn default_upstream(cache: &Cache, config: &Config) -> Upstream {
    let id = &config.default_backend_service;
    let template = UpstreamServer::new(String::new(), 0);
    let backends = cache
        .services
        .get(id)
        .and_then(|svc| {
            let port = svc.spec.as_ref()?.ports.as_ref()?.first()?;
            let target = target_port(cache, svc, id, port)?;
            Some(endpoint_servers(cache, id, target, &template))
        })
        .filter(|backends| !backends.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!(service = %id, "Default backend unavailable; using placeholder");
            vec![UpstreamServer::placeholder()]
        });

    Upstream {
        name: id.to_string(),
        host: DEFAULT_HOST.to_string(),
        path: DEFAULT_PATH.to_string(),
        redirect_if_not_tls: config.default_tls_secret.is_some(),
        read_timeout: None,
        write_timeout: None,
        backends,
    }
}

/// Builds the per-backend settings shared by every address of a service port.
fn server_template(config: &PortBackendConfig, svc: &ResourceId, port: &str) -> UpstreamServer {
    let protocol = match config.proto.as_deref() {
        None => Protocol::default(),
        Some(proto) => proto.parse().unwrap_or_else(|error| {
            tracing::warn!(service = %svc, port, %error, "Falling back to http/1.1");
            Protocol::Http1
        }),
    };
    let affinity = match config.affinity.as_deref() {
        None => Affinity::default(),
        Some(affinity) => affinity.parse().unwrap_or_else(|error| {
            tracing::warn!(service = %svc, port, %error, "Disabling session affinity");
            Affinity::None
        }),
    };

    UpstreamServer {
        address: String::new(),
        port: 0,
        protocol,
        tls: config.tls.unwrap_or(false),
        sni: config.sni.clone().filter(|sni| !sni.is_empty()),
        dns: config.dns.unwrap_or(false),
        affinity,
    }
}

/// Resolves the addresses behind the first service port that matches `want` by number, target
/// port, or name.
fn service_backends(
    cache: &Cache,
    svc: &k8s::Service,
    svc_id: &ResourceId,
    want: &str,
    template: &UpstreamServer,
) -> Vec<UpstreamServer> {
    let port = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .find(|port| {
            port.port.to_string() == want
                || port.target_port.as_ref().map(int_or_string) == Some(want.to_string())
                || port.name.as_deref() == Some(want)
        });
    let Some(port) = port else {
        tracing::warn!(service = %svc_id, port = want, "No matching service port");
        return vec![];
    };

    match target_port(cache, svc, svc_id, port) {
        Some(target) => endpoint_servers(cache, svc_id, target, template),
        None => vec![],
    }
}

fn int_or_string(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

/// Resolves the numeric port that endpoints of a service port listen on.
pub(crate) fn target_port(
    cache: &Cache,
    svc: &k8s::Service,
    svc_id: &ResourceId,
    port: &k8s::ServicePort,
) -> Option<u16> {
    let target = match port.target_port.as_ref() {
        None => port.port,
        Some(IntOrString::Int(n)) => *n,
        Some(IntOrString::String(s)) => match s.parse::<i32>() {
            Ok(n) => n,
            Err(_) => named_port(cache, svc, svc_id, port, s)?,
        },
    };

    // Kubernetes ports are 1-65535; anything else matches no endpoint.
    u16::try_from(target).ok().filter(|p| *p != 0)
}

/// Finds a named container port on the first pod the service selects.
fn named_port(
    cache: &Cache,
    svc: &k8s::Service,
    svc_id: &ResourceId,
    port: &k8s::ServicePort,
    name: &str,
) -> Option<i32> {
    let selector = reference::service_selector(svc);
    let Some(pod) = cache
        .pods
        .list_namespace(&svc_id.namespace)
        .find(|pod| selector.matches(&Labels::from(pod.metadata.labels.as_ref())))
    else {
        tracing::warn!(service = %svc_id, port = name, "No pods available to resolve named port");
        return None;
    };

    let protocol = port.protocol.as_deref().unwrap_or("TCP");
    let found = pod
        .spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|container| container.ports.iter().flatten())
        .find(|cp| {
            cp.name.as_deref() == Some(name) && cp.protocol.as_deref().unwrap_or("TCP") == protocol
        })
        .map(|cp| cp.container_port);
    if found.is_none() {
        tracing::warn!(
            service = %svc_id,
            pod = %pod.name_unchecked(),
            port = name,
            "Pod has no container port with this name"
        );
    }
    found
}

/// Lists one server per ready address of every TCP endpoint port equal to `target`.
pub(crate) fn endpoint_servers(
    cache: &Cache,
    svc_id: &ResourceId,
    target: u16,
    template: &UpstreamServer,
) -> Vec<UpstreamServer> {
    let Some(endpoints) = cache.endpoints.get(svc_id) else {
        tracing::debug!(service = %svc_id, "Endpoints not found");
        return vec![];
    };

    let mut servers = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        for ep_port in subset.ports.iter().flatten() {
            if ep_port.protocol.as_deref().unwrap_or("TCP") != "TCP"
                || ep_port.port != i32::from(target)
            {
                continue;
            }
            for addr in subset.addresses.iter().flatten() {
                servers.push(UpstreamServer {
                    address: addr.ip.clone(),
                    port: target,
                    ..template.clone()
                });
            }
        }
    }
    servers
}
