use h2_ingress_k8s_api::{self as k8s, IngressLoadBalancerIngress, ResourceId};
use h2_ingress_k8s_index::Cache;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("pod {0} not found")]
    PodNotFound(ResourceId),

    #[error("pod {0} is not scheduled to a node")]
    Unscheduled(ResourceId),

    #[error("node {node} of pod {pod} not found")]
    NodeNotFound { node: String, pod: ResourceId },

    #[error("node {0} has no usable address")]
    NoAddress(String),

    #[error("publish service {0} not found")]
    ServiceNotFound(ResourceId),
}

/// Picks the address a node is reachable at from outside the cluster.
///
/// An external IP always wins, even when listed after an internal one. Internal IPs are only
/// considered when `allow_internal_ip` is set.
pub fn node_address(node: &k8s::Node, allow_internal_ip: bool) -> Option<&str> {
    let mut fallback = None;
    for addr in node
        .status
        .iter()
        .flat_map(|status| status.addresses.iter().flatten())
    {
        if addr.address.is_empty() {
            continue;
        }
        match addr.type_.as_str() {
            "ExternalIP" => return Some(&addr.address),
            "InternalIP" if allow_internal_ip && fallback.is_none() => {
                fallback = Some(addr.address.as_str())
            }
            "LegacyHostIP" if fallback.is_none() => fallback = Some(addr.address.as_str()),
            _ => {}
        }
    }
    fallback
}

/// Resolves the address of the node a pod runs on.
pub fn pod_address(
    cache: &Cache,
    pod: &k8s::Pod,
    allow_internal_ip: bool,
) -> Result<String, AddressError> {
    let id = ResourceId::of(pod).unwrap_or_else(|| ResourceId::new("", ""));
    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AddressError::Unscheduled(id.clone()))?;

    let node = cache
        .nodes
        .get(&ResourceId::new("", node))
        .ok_or_else(|| AddressError::NodeNotFound {
            node: node.to_string(),
            pod: id,
        })?;
    node_address(node, allow_internal_ip)
        .map(str::to_string)
        .ok_or_else(|| AddressError::NoAddress(node.metadata.name.clone().unwrap_or_default()))
}

/// Addresses that parse as an IP are published as `ip`, anything else as `hostname`.
pub fn load_balancer_ingress(address: &str) -> IngressLoadBalancerIngress {
    if address.parse::<IpAddr>().is_ok() {
        IngressLoadBalancerIngress {
            ip: Some(address.to_string()),
            ..Default::default()
        }
    } else {
        IngressLoadBalancerIngress {
            hostname: Some(address.to_string()),
            ..Default::default()
        }
    }
}

/// Orders entries by IP, then hostname, and removes duplicates.
pub fn normalize(addresses: &mut Vec<IngressLoadBalancerIngress>) {
    addresses.sort_by(|a, b| (&a.ip, &a.hostname).cmp(&(&b.ip, &b.hostname)));
    addresses.dedup_by(|b, a| a.ip == b.ip && a.hostname == b.hostname);
}

/// Compares published addresses, ignoring any port information.
pub(crate) fn same_addresses(
    a: &[IngressLoadBalancerIngress],
    b: &[IngressLoadBalancerIngress],
) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(a, b)| a.ip == b.ip && a.hostname == b.hostname)
}

pub(crate) fn matches(entry: &IngressLoadBalancerIngress, address: &str) -> bool {
    entry.ip.as_deref() == Some(address) || entry.hostname.as_deref() == Some(address)
}

/// Addresses advertised through a publish Service: its load balancer status and external IPs.
pub fn service_addresses(service: &k8s::Service) -> Vec<IngressLoadBalancerIngress> {
    let balanced = service
        .status
        .iter()
        .filter_map(|status| status.load_balancer.as_ref())
        .flat_map(|lb| lb.ingress.iter().flatten())
        .map(|lb| IngressLoadBalancerIngress {
            ip: lb.ip.clone().filter(|ip| !ip.is_empty()),
            hostname: lb.hostname.clone().filter(|host| !host.is_empty()),
            ports: None,
        })
        .filter(|entry| entry.ip.is_some() || entry.hostname.is_some());
    let external = service
        .spec
        .iter()
        .flat_map(|spec| spec.external_ips.iter().flatten())
        .filter(|ip| !ip.is_empty())
        .map(|ip| load_balancer_ingress(ip));

    let mut addresses = balanced.chain(external).collect();
    normalize(&mut addresses);
    addresses
}
