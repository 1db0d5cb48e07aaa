//! Session clustering: member discovery objects and the server configuration fragment.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};

use super::service::{headless_service_name, PING_PORT};
use super::{object_labels, object_meta, selector_labels, selector_string};
use crate::api::v1alpha1::webserver::WebServer;

pub const CLUSTERING_SCRIPT_KEY: &str = "clustering.sh";
pub const CLUSTERING_MOUNT_PATH: &str = "/opt/webserver-clustering";

/// How cluster members find each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discovery {
    /// Members list their peers through the API, which needs the `view` role.
    Kubernetes,
    /// Members resolve the headless service.
    Dns,
}

pub fn role_binding_name(web_server: &WebServer) -> String {
    format!("{}-view", web_server.spec.application_name)
}

pub fn config_map_name(web_server: &WebServer) -> String {
    format!("{}-clustering", web_server.spec.application_name)
}

/// Grants the namespace's default service account read access, so members can list pods.
pub fn build_role_binding(web_server: &WebServer, hash: &str) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(web_server, role_binding_name(web_server), object_labels(web_server, hash)),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "view".to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: "default".to_string(),
            namespace: web_server.metadata.namespace.clone(),
            ..Default::default()
        }]),
    }
}

pub fn build_config_map(web_server: &WebServer, discovery: Discovery, hash: &str) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(web_server, config_map_name(web_server), object_labels(web_server, hash)),
        data: Some(BTreeMap::from([(
            CLUSTERING_SCRIPT_KEY.to_string(),
            clustering_script(web_server, discovery),
        )])),
        ..Default::default()
    }
}

/// Shell fragment sourced by the server image at startup.
pub fn clustering_script(web_server: &WebServer, discovery: Discovery) -> String {
    let membership = match discovery {
        Discovery::Kubernetes => format!(
            concat!(
                "export KUBERNETES_LABELS=\"{labels}\"\n",
                "MEMBERSHIP_PROVIDER=org.apache.catalina.tribes.membership.cloud.KubernetesMembershipProvider\n",
            ),
            labels = selector_string(&selector_labels(web_server)),
        ),
        Discovery::Dns => format!(
            concat!(
                "export DNS_MEMBERSHIP_SERVICE_NAME={service}\n",
                "MEMBERSHIP_PROVIDER=org.apache.catalina.tribes.membership.cloud.DNSMembershipProvider\n",
            ),
            service = headless_service_name(web_server),
        ),
    };

    format!(
        concat!(
            "# Session clustering for {app}\n",
            "{membership}",
            "CLUSTER_PORT={port}\n",
            "CLUSTER_MEMBERSHIP=\"<Membership className=\\\"org.apache.catalina.tribes.membership.cloud.CloudMembershipService\\\" ",
            "membershipProviderClassName=\\\"${{MEMBERSHIP_PROVIDER}}\\\"/>\"\n",
            "CLUSTER_CONFIG=\"<Cluster className=\\\"org.apache.catalina.ha.tcp.SimpleTcpCluster\\\">",
            "<Channel className=\\\"org.apache.catalina.tribes.group.GroupChannel\\\">${{CLUSTER_MEMBERSHIP}}",
            "<Receiver className=\\\"org.apache.catalina.tribes.transport.nio.NioReceiver\\\" port=\\\"${{CLUSTER_PORT}}\\\"/>",
            "</Channel></Cluster>\"\n",
            "sed -i \"s|<!-- ##CLUSTER## -->|${{CLUSTER_CONFIG}}|\" \"${{CATALINA_HOME}}/conf/server.xml\"\n",
        ),
        app = web_server.spec.application_name,
        membership = membership,
        port = PING_PORT,
    )
}
