use super::*;

fn applied<T>(obj: T) -> Change<T> {
    Change::Applied {
        old: None,
        new: Arc::new(obj),
    }
}

fn cache_with_ingress() -> Cache {
    let mut cache = Cache::default();
    cache.ingresses.insert(with_tls(
        mk_ingress("ns", "web", "", &[("/", "web", 80)]),
        "web-tls",
    ));
    cache
        .services
        .insert(mk_service("ns", "web", IntOrString::Int(8080)));
    cache
        .services
        .insert(mk_service("kube-system", "default-http-backend", IntOrString::Int(8080)));
    cache
}

#[test]
fn ingress_class() {
    let cache = Cache::default();
    let config = mk_config();

    let ing = mk_ingress("ns", "web", "", &[("/", "web", 80)]);
    assert!(is_relevant(&cache, &config, &Notification::Ingress(applied(ing.clone()))));

    let ours = with_annotation(ing.clone(), k8s::INGRESS_CLASS_ANNOTATION, "h2-ingress");
    assert!(is_relevant(&cache, &config, &Notification::Ingress(applied(ours.clone()))));

    let theirs = with_annotation(ing, k8s::INGRESS_CLASS_ANNOTATION, "nginx");
    assert!(!is_relevant(&cache, &config, &Notification::Ingress(applied(theirs.clone()))));

    // Moving an Ingress out of scope must still trigger a recompute.
    let moved = Change::Applied {
        old: Some(Arc::new(ours)),
        new: Arc::new(theirs.clone()),
    };
    assert!(is_relevant(&cache, &config, &Notification::Ingress(moved)));

    let deleted = Change::Deleted(Deleted::Known(Arc::new(theirs)));
    assert!(!is_relevant(&cache, &config, &Notification::Ingress(deleted)));
}

#[test]
fn endpoints() {
    let cache = cache_with_ingress();
    let config = mk_config();
    let relevant =
        |ep| is_relevant(&cache, &config, &Notification::Endpoints(applied(ep)));

    assert!(relevant(mk_endpoints("ns", "web", 8080, &["10.0.0.1"])));
    assert!(relevant(mk_endpoints(
        "kube-system",
        "default-http-backend",
        8080,
        &["10.0.0.1"]
    )));
    assert!(!relevant(mk_endpoints("ns", "api", 8080, &["10.0.0.1"])));
    assert!(!relevant(mk_endpoints("other", "web", 8080, &["10.0.0.1"])));
}

#[test]
fn endpoints_of_default_backend_of_ingress() {
    let mut cache = Cache::default();
    let mut ing = mk_ingress("ns", "web", "", &[]);
    ing.spec.as_mut().unwrap().default_backend = Some(k8s::IngressBackend {
        service: Some(k8s::IngressServiceBackend {
            name: "fallback".to_string(),
            port: Some(ServiceBackendPort {
                number: Some(80),
                name: None,
            }),
        }),
        resource: None,
    });
    cache.ingresses.insert(ing);

    let ep = mk_endpoints("ns", "fallback", 8080, &["10.0.0.1"]);
    assert!(is_relevant(
        &cache,
        &mk_config(),
        &Notification::Endpoints(applied(ep))
    ));
}

#[test]
fn secrets() {
    let cache = cache_with_ingress();
    let mut config = mk_config();
    config.default_tls_secret = Some(ResourceId::new("kube-system", "default-tls"));
    let relevant = |secret| is_relevant(&cache, &config, &Notification::Secret(applied(secret)));

    assert!(relevant(mk_secret("ns", "web-tls", b"", b"")));
    assert!(relevant(mk_secret("kube-system", "default-tls", b"", b"")));
    assert!(!relevant(mk_secret("ns", "other-tls", b"", b"")));
    assert!(!relevant(mk_secret("other", "web-tls", b"", b"")));
}

#[test]
fn pods() {
    let cache = cache_with_ingress();
    let config = mk_config();
    let relevant = |pod| is_relevant(&cache, &config, &Notification::Pod(applied(pod)));

    assert!(relevant(mk_pod("ns", "web-0", "web", &[])));
    assert!(relevant(mk_pod(
        "kube-system",
        "default-http-backend-0",
        "default-http-backend",
        &[]
    )));
    assert!(!relevant(mk_pod("ns", "api-0", "api", &[])));
    assert!(!relevant(mk_pod("other", "web-0", "web", &[])));
}

#[test]
fn pods_of_selectorless_service() {
    let mut cache = cache_with_ingress();
    let mut svc = mk_service("ns", "web", IntOrString::Int(8080));
    svc.spec.as_mut().unwrap().selector = None;
    cache.services.insert(svc);

    let pod = mk_pod("ns", "web-0", "web", &[]);
    assert!(!is_relevant(
        &cache,
        &mk_config(),
        &Notification::Pod(applied(pod))
    ));
}

#[test]
fn config_maps() {
    let cache = Cache::default();
    let config = mk_config();
    let cm = |ns: &str, name: &str| k8s::ConfigMap {
        metadata: mk_meta(ns, name),
        ..Default::default()
    };

    assert!(is_relevant(
        &cache,
        &config,
        &Notification::ConfigMap(applied(cm("kube-system", "h2-ingress")))
    ));
    assert!(!is_relevant(
        &cache,
        &config,
        &Notification::ConfigMap(applied(cm("kube-system", "other")))
    ));

    let unconfigured = Config {
        proxy_config_map: None,
        ..mk_config()
    };
    assert!(!is_relevant(
        &cache,
        &unconfigured,
        &Notification::ConfigMap(applied(cm("kube-system", "h2-ingress")))
    ));
}

#[test]
fn services_and_nodes_are_never_relevant() {
    let cache = cache_with_ingress();
    let config = mk_config();
    let svc = mk_service("ns", "web", IntOrString::Int(9090));
    assert!(!is_relevant(
        &cache,
        &config,
        &Notification::Service(applied(svc))
    ));
    assert!(!is_relevant(
        &cache,
        &config,
        &Notification::Node(applied(k8s::Node::default()))
    ));
}
