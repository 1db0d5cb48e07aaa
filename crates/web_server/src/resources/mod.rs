//! Pure builders for the objects a `WebServer` owns.
//!
//! Nothing in here talks to the API server. Every builder takes the owner and the
//! already computed fingerprint and returns a complete object ready for `upsert`.

pub mod build;
pub mod clustering;
pub mod deployment;
pub mod probes;
pub mod route;
pub mod service;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::api::v1alpha1::webserver::{WebServer, WebServerSpec};

pub const APPLICATION_LABEL: &str = "application";
pub const OWNER_LABEL: &str = "WebServer";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const HASH_LABEL: &str = "webserver-hash";
pub const BUILD_LABEL: &str = "webserver-build";

pub const HTTP_PORT: i32 = 8080;
pub const HTTPS_PORT: i32 = 8443;

/// The workload kind running the web server pods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn of(spec: &WebServerSpec) -> Self {
        if spec.uses_stateful_set() {
            WorkloadKind::StatefulSet
        } else {
            WorkloadKind::Deployment
        }
    }

    /// Selector label key distinguishing pods of this kind.
    pub fn marker(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
        }
    }
}

pub fn core_labels(web_server: &WebServer) -> BTreeMap<String, String> {
    let owner = web_server.name_any();
    BTreeMap::from([
        (APPLICATION_LABEL.to_string(), web_server.spec.application_name.clone()),
        (OWNER_LABEL.to_string(), owner.clone()),
        (NAME_LABEL.to_string(), owner),
    ])
}

/// Labels selecting the application pods: the core set plus the workload marker.
pub fn selector_labels(web_server: &WebServer) -> BTreeMap<String, String> {
    let mut labels = core_labels(web_server);
    labels.insert(
        WorkloadKind::of(&web_server.spec).marker().to_string(),
        web_server.spec.application_name.clone(),
    );
    labels
}

/// Labels copied from the `WebServer` onto everything it owns.
///
/// Keys managed by the operator are dropped so a user label can never break a selector.
pub fn passthrough_labels(web_server: &WebServer) -> BTreeMap<String, String> {
    let reserved = [
        APPLICATION_LABEL,
        OWNER_LABEL,
        NAME_LABEL,
        HASH_LABEL,
        BUILD_LABEL,
        WorkloadKind::Deployment.marker(),
        WorkloadKind::StatefulSet.marker(),
    ];
    web_server
        .labels()
        .iter()
        .filter(|(key, _)| !reserved.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Labels on generated objects: core, pass-through and the fingerprint.
pub fn object_labels(web_server: &WebServer, hash: &str) -> BTreeMap<String, String> {
    let mut labels = passthrough_labels(web_server);
    labels.extend(core_labels(web_server));
    labels.insert(HASH_LABEL.to_string(), hash.to_string());
    labels
}

/// Labels on application pods: selector, pass-through and the fingerprint.
pub fn pod_labels(web_server: &WebServer, hash: &str) -> BTreeMap<String, String> {
    let mut labels = object_labels(web_server, hash);
    labels.extend(selector_labels(web_server));
    labels
}

/// Equality selector in `key=value,...` form, as used by list calls and the scale subresource.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn object_meta(web_server: &WebServer, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: web_server.namespace(),
        labels: Some(labels),
        owner_references: web_server.controller_owner_ref(&()).map(|owner_ref| vec![owner_ref]),
        ..Default::default()
    }
}

/// The fingerprint label of a live object, if any.
pub fn hash_of<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(HASH_LABEL))
        .map(String::as_str)
}
