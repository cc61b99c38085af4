use crate::{
    k8s::{
        self,
        api::{
            core::v1::{Container, ContainerPort, PodSpec, ServiceSpec},
            networking::v1::{
                HTTPIngressPath, HTTPIngressRuleValue, IngressRule, IngressSpec, IngressTLS,
                ServiceBackendPort,
            },
        },
        ByteString, IntOrString, ObjectMeta, ResourceId,
    },
    *,
};
use h2_ingress_core::{
    queue::{Queue, QueueMetrics},
    rate_limit::TokenBucket,
    UpstreamServer,
};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

mod relevance;

pub(crate) fn mk_cert(name: &str) -> (Vec<u8>, Vec<u8>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    (cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes())
}

pub(crate) fn mk_anonymous_cert() -> (Vec<u8>, Vec<u8>) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = rcgen::DistinguishedName::new();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem().into_bytes(), key_pair.serialize_pem().into_bytes())
}

fn mk_config() -> Config {
    Config {
        default_backend_service: ResourceId::new("kube-system", "default-http-backend"),
        default_tls_secret: None,
        ingress_class: "h2-ingress".to_string(),
        proxy_config_map: Some(ResourceId::new("kube-system", "h2-ingress")),
        conf_dir: "/etc/h2-ingress".into(),
    }
}

fn mk_meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// An Ingress with a single rule. Each path is `(path, service, port)`.
fn mk_ingress(ns: &str, name: &str, host: &str, paths: &[(&str, &str, i32)]) -> k8s::Ingress {
    let paths = paths
        .iter()
        .map(|(path, svc, port)| HTTPIngressPath {
            path: Some(path.to_string()),
            path_type: "Prefix".to_string(),
            backend: k8s::IngressBackend {
                service: Some(k8s::IngressServiceBackend {
                    name: svc.to_string(),
                    port: Some(ServiceBackendPort {
                        number: Some(*port),
                        name: None,
                    }),
                }),
                resource: None,
            },
        })
        .collect();

    k8s::Ingress {
        metadata: mk_meta(ns, name),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()).filter(|h| !h.is_empty()),
                http: Some(HTTPIngressRuleValue { paths }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn with_tls(mut ingress: k8s::Ingress, secret: &str) -> k8s::Ingress {
    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls.get_or_insert_with(Vec::new).push(IngressTLS {
            hosts: None,
            secret_name: Some(secret.to_string()),
        });
    }
    ingress
}

fn with_annotation(mut ingress: k8s::Ingress, key: &str, value: &str) -> k8s::Ingress {
    ingress
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    ingress
}

/// A Service selecting `app: <name>` with one port `80 -> target`.
fn mk_service(ns: &str, name: &str, target: IntOrString) -> k8s::Service {
    k8s::Service {
        metadata: mk_meta(ns, name),
        spec: Some(ServiceSpec {
            selector: Some(btreemap! { "app".to_string() => name.to_string() }),
            ports: Some(vec![k8s::ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(target),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn mk_endpoints(ns: &str, name: &str, port: i32, ips: &[&str]) -> k8s::Endpoints {
    k8s::Endpoints {
        metadata: mk_meta(ns, name),
        subsets: Some(vec![k8s::EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| k8s::EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![k8s::EndpointPort {
                port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn mk_pod(ns: &str, name: &str, app: &str, ports: &[(&str, i32)]) -> k8s::Pod {
    let mut meta = mk_meta(ns, name);
    meta.labels = Some(btreemap! { "app".to_string() => app.to_string() });
    k8s::Pod {
        metadata: meta,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ports: Some(
                    ports
                        .iter()
                        .map(|(name, port)| ContainerPort {
                            name: Some(name.to_string()),
                            container_port: *port,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

fn mk_secret(ns: &str, name: &str, cert: &[u8], key: &[u8]) -> k8s::Secret {
    k8s::Secret {
        metadata: mk_meta(ns, name),
        data: Some(btreemap! {
            "tls.crt".to_string() => ByteString(cert.to_vec()),
            "tls.key".to_string() => ByteString(key.to_vec()),
        }),
        ..Default::default()
    }
}

/// A live Service named `name` with endpoints on port 8080.
fn add_service(cache: &mut Cache, ns: &str, name: &str, ips: &[&str]) {
    cache
        .services
        .insert(mk_service(ns, name, IntOrString::Int(8080)));
    cache.endpoints.insert(mk_endpoints(ns, name, 8080, ips));
}

fn backend(ip: &str, port: u16) -> UpstreamServer {
    UpstreamServer::new(ip, port)
}

// === Index ===

fn mk_queue() -> (h2_ingress_core::queue::Handle, Queue) {
    Queue::new(TokenBucket::new(100.0, 100).unwrap(), QueueMetrics::default())
}

#[tokio::test(start_paused = true)]
async fn index_requests_recompute_for_relevant_changes() {
    use kubert::index::IndexNamespacedResource;

    let (handle, queue) = mk_queue();
    let index = Index::shared(Arc::new(mk_config()), handle, IndexMetrics::default());

    let runs = Arc::new(AtomicUsize::new(0));
    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let runs = runs.clone();
        queue.run(
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok(()))
            },
            shutdown.clone(),
        )
    });

    // A Service alone never requests a recompute.
    index
        .write()
        .apply(mk_service("ns", "web", IntOrString::Int(8080)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Endpoints of a Service nobody routes to are ignored as well.
    index.write().apply(mk_endpoints("ns", "web", 8080, &["10.0.0.1"]));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    index
        .write()
        .apply(mk_ingress("ns", "web", "", &[("/", "web", 80)]));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Re-applying an identical object is not a change.
    index
        .write()
        .apply(mk_ingress("ns", "web", "", &[("/", "web", 80)]));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Now that the Service is routed to, its endpoints matter.
    index
        .write()
        .apply(mk_endpoints("ns", "web", 8080, &["10.0.0.1", "10.0.0.2"]));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    IndexNamespacedResource::<k8s::Endpoints>::delete(
        &mut *index.write(),
        "ns".to_string(),
        "web".to_string(),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reset_marks_synced_and_removes_missing() {
    use kubert::index::{IndexClusterResource, IndexNamespacedResource};

    let (handle, _queue) = mk_queue();
    let index = Index::shared(Arc::new(mk_config()), handle, IndexMetrics::default());

    IndexNamespacedResource::<k8s::Ingress>::reset(
        &mut *index.write(),
        vec![
            mk_ingress("ns", "a", "", &[("/", "web", 80)]),
            mk_ingress("ns", "b", "", &[("/", "web", 80)]),
        ],
        Default::default(),
    );
    assert_eq!(index.read().cache().ingresses.len(), 2);
    assert!(index.read().cache().ingresses.has_synced());
    assert!(!index.read().has_synced());

    let mut removed = kubert::index::NamespacedRemoved::default();
    removed
        .entry("ns".to_string())
        .or_default()
        .insert("b".to_string());
    IndexNamespacedResource::<k8s::Ingress>::reset(
        &mut *index.write(),
        vec![mk_ingress("ns", "a", "", &[("/", "web", 80)])],
        removed,
    );
    let names = index
        .read()
        .cache()
        .ingresses
        .list()
        .map(|ing| ing.metadata.name.clone().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a".to_string()]);

    macro_rules! reset_empty {
        ($($ty:ty),+) => {
            $(
                IndexNamespacedResource::<$ty>::reset(
                    &mut *index.write(),
                    vec![],
                    Default::default(),
                );
            )+
        };
    }
    reset_empty!(
        k8s::Service,
        k8s::Endpoints,
        k8s::Secret,
        k8s::ConfigMap,
        k8s::Pod
    );
    assert!(!index.read().has_synced());
    IndexClusterResource::<k8s::Node>::reset(&mut *index.write(), vec![], Default::default());
    assert!(index.read().has_synced());
}
