use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{object_labels, object_meta};
use crate::api::openshift::{Route, RoutePort, RouteSpec, RouteTargetReference, RouteTls};
use crate::api::v1alpha1::webserver::WebServer;

/// Route exposing the routing service outside the cluster.
///
/// With a TLS secret the server terminates TLS itself, so the router passes the
/// connection through to the `https` port.
pub fn build_route(web_server: &WebServer, hash: &str) -> Route {
    let spec = &web_server.spec;
    let (target_port, tls) = match spec.tls_secret() {
        Some(_) => (
            "https",
            Some(RouteTls {
                termination: "passthrough".to_string(),
                insecure_edge_termination_policy: Some("Redirect".to_string()),
            }),
        ),
        None => ("http", None),
    };

    Route {
        metadata: object_meta(web_server, spec.application_name.clone(), object_labels(web_server, hash)),
        spec: RouteSpec {
            host: spec.route_hostname().map(str::to_string),
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: spec.application_name.clone(),
                weight: Some(100),
            },
            port: Some(RoutePort {
                target_port: IntOrString::String(target_port.to_string()),
            }),
            tls,
        },
        status: None,
    }
}

/// Hostnames admitted by the routers, sorted.
pub fn ingress_hosts(route: &Route) -> Vec<String> {
    let mut hosts: Vec<String> = route
        .status
        .iter()
        .flat_map(|status| status.ingress.iter())
        .filter_map(|ingress| ingress.host.clone())
        .filter(|host| !host.is_empty())
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}
