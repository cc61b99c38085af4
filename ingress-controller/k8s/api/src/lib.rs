#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod duration;
pub mod labels;
mod resource_id;

pub use self::{
    labels::{Labels, Selector},
    resource_id::{InvalidResourceId, ResourceId},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node,
            NodeAddress, Pod, Secret, Service, ServicePort,
        },
        networking::v1::{
            Ingress, IngressBackend, IngressLoadBalancerIngress, IngressLoadBalancerStatus,
            IngressServiceBackend, IngressStatus,
        },
    },
    apimachinery::pkg::util::intstr::IntOrString,
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client, Error,
};

/// Ingresses carrying this annotation are claimed by the named controller class.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Returns the class an Ingress asks for, or `""` if it does not ask for one.
///
/// The legacy annotation takes precedence over `spec.ingressClassName`.
pub fn ingress_class(ingress: &Ingress) -> &str {
    if let Some(class) = ingress.annotations().get(INGRESS_CLASS_ANNOTATION) {
        return class;
    }
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress_class_name.as_deref())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::IngressSpec;
    use maplit::btreemap;

    fn ingress(annotation: Option<&str>, class_name: Option<&str>) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                annotations: annotation.map(|v| {
                    btreemap! { INGRESS_CLASS_ANNOTATION.to_string() => v.to_string() }
                }),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: class_name.map(Into::into),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn annotation_overrides_class_name() {
        assert_eq!(ingress_class(&ingress(Some("a"), Some("b"))), "a");
        assert_eq!(ingress_class(&ingress(None, Some("b"))), "b");
        assert_eq!(ingress_class(&ingress(None, None)), "");
        assert_eq!(ingress_class(&Ingress::default()), "");
    }
}
