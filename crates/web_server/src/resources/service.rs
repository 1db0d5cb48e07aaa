use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{object_labels, object_meta, selector_labels, HTTPS_PORT, HTTP_PORT};
use crate::api::v1alpha1::webserver::WebServer;

/// Port used by DNS-based session replication between members.
pub const PING_PORT: i32 = 8888;

pub fn headless_service_name(web_server: &WebServer) -> String {
    format!("{}-headless", web_server.spec.application_name)
}

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// ClusterIP service `<app>` in front of the application pods.
pub fn build_service(web_server: &WebServer, hash: &str) -> Service {
    let mut ports = vec![port("http", HTTP_PORT)];
    if web_server.spec.tls_secret().is_some() {
        ports.push(port("https", HTTPS_PORT));
    }

    Service {
        metadata: object_meta(
            web_server,
            web_server.spec.application_name.clone(),
            object_labels(web_server, hash),
        ),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(web_server)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Headless service used for member discovery when the pods may not read the API.
pub fn build_headless_service(web_server: &WebServer, hash: &str) -> Service {
    Service {
        metadata: object_meta(
            web_server,
            headless_service_name(web_server),
            object_labels(web_server, hash),
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(web_server)),
            ports: Some(vec![port("ping", PING_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The part of a service spec this operator owns.
///
/// The API server fills in cluster IPs, node ports and other defaults, so live and
/// desired services are compared on this projection only.
pub fn routing_differs(live: &Service, desired: &Service) -> bool {
    type Projection<'a> = (Vec<(Option<String>, i32)>, Option<&'a BTreeMap<String, String>>);

    fn projection(service: &Service) -> Projection<'_> {
        let spec = service.spec.as_ref();
        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(|p| (p.name.clone(), p.port)).collect())
            .unwrap_or_default();
        (ports, spec.and_then(|s| s.selector.as_ref()))
    }
    projection(live) != projection(desired)
}

/// Copies the owned part of `desired` onto a live service, keeping server-assigned fields.
pub fn adopt_routing(live: &mut Service, desired: Service) {
    let spec = live.spec.get_or_insert_with(Default::default);
    let wanted = desired.spec.unwrap_or_default();
    spec.ports = wanted.ports;
    spec.selector = wanted.selector;
    live.metadata.labels = desired.metadata.labels;
}
