use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use super::clustering::{config_map_name, CLUSTERING_MOUNT_PATH, CLUSTERING_SCRIPT_KEY};
use super::probes::{liveness_probe, readiness_probe};
use super::{object_labels, object_meta, pod_labels, selector_labels, HASH_LABEL, HTTPS_PORT, HTTP_PORT};
use crate::api::v1alpha1::webserver::WebServer;

pub const LOG_VOLUME: &str = "logs";
pub const LOG_MOUNT_PATH: &str = "/opt/tomcat_logs";
pub const TLS_MOUNT_PATH: &str = "/tls";

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn volume_name(prefix: &str, name: &str) -> String {
    format!("{prefix}-{name}")
}

fn container(web_server: &WebServer, image: &str) -> Container {
    let spec = &web_server.spec;

    let mut ports = vec![ContainerPort {
        name: Some("http".to_string()),
        container_port: HTTP_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];

    let mut env_vars: Vec<EnvVar> = spec
        .environment_variables
        .iter()
        .map(|var| env(&var.name, var.value.clone()))
        .collect();
    let mut mounts = Vec::new();

    if spec.use_session_clustering {
        env_vars.push(EnvVar {
            name: "KUBERNETES_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        env_vars.push(env(
            "ENV_FILES",
            format!("{CLUSTERING_MOUNT_PATH}/{CLUSTERING_SCRIPT_KEY}"),
        ));
        mounts.push(VolumeMount {
            name: config_map_name(web_server),
            mount_path: CLUSTERING_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    if spec.tls_secret().is_some() {
        ports.push(ContainerPort {
            name: Some("https".to_string()),
            container_port: HTTPS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
        env_vars.push(env("TLS_CERTIFICATE_DIR", TLS_MOUNT_PATH));
        if let Some(verification) = spec
            .tls_config
            .as_ref()
            .and_then(|tls| tls.certificate_verification.as_deref())
        {
            env_vars.push(env("TLS_CERTIFICATE_VERIFICATION", verification));
        }
        mounts.push(VolumeMount {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    if let Some(logs) = &spec.persistent_logs {
        if logs.catalina_logs {
            env_vars.push(env("CATALINA_LOGS_DIR", LOG_MOUNT_PATH));
        }
        if logs.enable_access_logs {
            env_vars.push(env("ENABLE_ACCESS_LOG", "true"));
        }
        mounts.push(VolumeMount {
            name: LOG_VOLUME.to_string(),
            mount_path: LOG_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    if let Some(volumes) = &spec.volumes {
        mounts.extend(volumes.secrets.iter().map(|name| VolumeMount {
            name: volume_name("secret", name),
            mount_path: format!("/secrets/{name}"),
            read_only: Some(true),
            ..Default::default()
        }));
        mounts.extend(volumes.config_maps.iter().map(|name| VolumeMount {
            name: volume_name("configmap", name),
            mount_path: format!("/configmaps/{name}"),
            read_only: Some(true),
            ..Default::default()
        }));
    }

    Container {
        name: spec.application_name.clone(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(ports),
        env: (!env_vars.is_empty()).then_some(env_vars),
        readiness_probe: Some(readiness_probe(spec.health_check())),
        liveness_probe: Some(liveness_probe(spec.health_check())),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    }
}

fn volumes(web_server: &WebServer) -> Vec<Volume> {
    let spec = &web_server.spec;
    let mut volumes = Vec::new();

    if spec.use_session_clustering {
        volumes.push(Volume {
            name: config_map_name(web_server),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name(web_server),
                default_mode: Some(0o555),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(secret) = spec.tls_secret() {
        volumes.push(secret_volume("tls".to_string(), secret));
    }

    if let Some(extra) = &spec.volumes {
        volumes.extend(
            extra
                .secrets
                .iter()
                .map(|name| secret_volume(volume_name("secret", name), name)),
        );
        volumes.extend(extra.config_maps.iter().map(|name| Volume {
            name: volume_name("configmap", name),
            config_map: Some(ConfigMapVolumeSource {
                name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }));
    }

    volumes
}

fn secret_volume(volume: String, secret: &str) -> Volume {
    Volume {
        name: volume,
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pod_template(web_server: &WebServer, image: &str, hash: &str) -> PodTemplateSpec {
    let volumes = volumes(web_server);
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels(web_server, hash)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container(web_server, image)],
            volumes: (!volumes.is_empty()).then_some(volumes),
            image_pull_secrets: web_server.spec.image_pull_secret().map(|name| {
                vec![LocalObjectReference {
                    name: name.to_string(),
                }]
            }),
            termination_grace_period_seconds: Some(60),
            ..Default::default()
        }),
    }
}

fn selector(web_server: &WebServer) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(web_server)),
        ..Default::default()
    }
}

pub fn build_deployment(web_server: &WebServer, image: &str, hash: &str) -> Deployment {
    Deployment {
        metadata: object_meta(
            web_server,
            web_server.spec.application_name.clone(),
            object_labels(web_server, hash),
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(web_server.spec.replicas),
            selector: selector(web_server),
            template: pod_template(web_server, image, hash),
            ..Default::default()
        }),
        status: None,
    }
}

/// StatefulSet variant used when logs must survive pod restarts.
pub fn build_stateful_set(web_server: &WebServer, image: &str, hash: &str) -> StatefulSet {
    let claim_templates = web_server.spec.persistent_logs.as_ref().map(|logs| {
        vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(LOG_VOLUME.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: logs.storage_class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(logs.size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    StatefulSet {
        metadata: object_meta(
            web_server,
            web_server.spec.application_name.clone(),
            object_labels(web_server, hash),
        ),
        spec: Some(StatefulSetSpec {
            replicas: Some(web_server.spec.replicas),
            selector: selector(web_server),
            template: pod_template(web_server, image, hash),
            volume_claim_templates: claim_templates,
            ..Default::default()
        }),
        status: None,
    }
}

/// What the reconciler compares between a live workload and the desired one.
#[derive(Debug, PartialEq, Eq)]
pub struct WorkloadState<'a> {
    pub hash: Option<&'a str>,
    pub image: Option<&'a str>,
    pub replicas: Option<i32>,
}

impl<'a> WorkloadState<'a> {
    fn new(meta: &'a ObjectMeta, replicas: Option<i32>, template: &'a PodTemplateSpec) -> Self {
        WorkloadState {
            hash: meta
                .labels
                .as_ref()
                .and_then(|labels| labels.get(HASH_LABEL))
                .map(String::as_str),
            image: template
                .spec
                .as_ref()
                .and_then(|spec| spec.containers.first())
                .and_then(|container| container.image.as_deref()),
            replicas,
        }
    }
}

/// Deployment and StatefulSet, as far as the reconciler cares.
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug
{
    fn state(&self) -> Option<WorkloadState<'_>>;

    /// Takes over replicas, pod template and labels from `desired`, keeping everything
    /// the API server manages.
    fn adopt(&mut self, desired: Self);
}

impl Workload for Deployment {
    fn state(&self) -> Option<WorkloadState<'_>> {
        let spec = self.spec.as_ref()?;
        Some(WorkloadState::new(&self.metadata, spec.replicas, &spec.template))
    }

    fn adopt(&mut self, desired: Self) {
        self.metadata.labels = desired.metadata.labels;
        if let (Some(live), Some(desired)) = (self.spec.as_mut(), desired.spec) {
            live.replicas = desired.replicas;
            live.template = desired.template;
        }
    }
}

impl Workload for StatefulSet {
    fn state(&self) -> Option<WorkloadState<'_>> {
        let spec = self.spec.as_ref()?;
        Some(WorkloadState::new(&self.metadata, spec.replicas, &spec.template))
    }

    fn adopt(&mut self, desired: Self) {
        self.metadata.labels = desired.metadata.labels;
        if let (Some(live), Some(desired)) = (self.spec.as_mut(), desired.spec) {
            live.replicas = desired.replicas;
            live.template = desired.template;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::webserver::{
        EnvironmentVariable, PersistentLogs, TlsConfig, VolumeSpec, WebImage,
    };
    use crate::resources::test_support::web_server;

    fn pod_spec(template: &PodTemplateSpec) -> &PodSpec {
        template.spec.as_ref().unwrap()
    }

    #[test]
    fn deployment_runs_the_resolved_image() {
        let owner = web_server();
        let deployment = build_deployment(&owner, "registry/demo:built", "AhA");
        let spec = deployment.spec.as_ref().unwrap();

        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.selector.match_labels, Some(selector_labels(&owner)));
        let container = &pod_spec(&spec.template).containers[0];
        assert_eq!(container.name, "demo");
        assert_eq!(container.image.as_deref(), Some("registry/demo:built"));

        assert_eq!(
            deployment.state().unwrap(),
            WorkloadState {
                hash: Some("AhA"),
                image: Some("registry/demo:built"),
                replicas: Some(2),
            }
        );
    }

    #[test]
    fn environment_and_pull_secret_are_projected() {
        let mut owner = web_server();
        owner.spec.environment_variables = vec![EnvironmentVariable {
            name: "JAVA_OPTS".to_string(),
            value: "-Xmx256m".to_string(),
        }];
        owner.spec.web_image = Some(WebImage {
            application_image: "quay.io/demo/app:1".to_string(),
            image_pull_secret: Some("pull".to_string()),
            ..Default::default()
        });

        let template = pod_template(&owner, "img", "AhA");
        let spec = pod_spec(&template);
        assert_eq!(spec.image_pull_secrets.as_ref().unwrap()[0].name, "pull");
        let env = spec.containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].name, "JAVA_OPTS");
        assert_eq!(env[0].value.as_deref(), Some("-Xmx256m"));
    }

    #[test]
    fn clustering_mounts_the_config_map() {
        let mut owner = web_server();
        owner.spec.use_session_clustering = true;

        let template = pod_template(&owner, "img", "AhA");
        let spec = pod_spec(&template);
        let mount = &spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/opt/webserver-clustering");
        assert_eq!(spec.volumes.as_ref().unwrap()[0].name, "demo-clustering");
        let env = spec.containers[0].env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|var| var.name == "ENV_FILES"
                && var.value.as_deref() == Some("/opt/webserver-clustering/clustering.sh")));
    }

    #[test]
    fn extra_volumes_are_mounted_read_only() {
        let mut owner = web_server();
        owner.spec.volumes = Some(VolumeSpec {
            secrets: vec!["db".to_string()],
            config_maps: vec!["settings".to_string()],
        });
        owner.spec.tls_config = Some(TlsConfig {
            tls_secret: Some("demo-tls".to_string()),
            ..Default::default()
        });

        let template = pod_template(&owner, "img", "AhA");
        let spec = pod_spec(&template);
        let paths: Vec<&str> = spec.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(paths, vec!["/tls", "/secrets/db", "/configmaps/settings"]);
        assert_eq!(spec.volumes.as_ref().unwrap().len(), 3);
        assert_eq!(spec.containers[0].ports.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn stateful_set_claims_a_log_volume() {
        let mut owner = web_server();
        owner.spec.persistent_logs = Some(PersistentLogs {
            enable_access_logs: true,
            size: "2Gi".to_string(),
            ..Default::default()
        });

        let stateful_set = build_stateful_set(&owner, "img", "AhA");
        let spec = stateful_set.spec.as_ref().unwrap();
        let claim = &spec.volume_claim_templates.as_ref().unwrap()[0];
        assert_eq!(claim.metadata.name.as_deref(), Some("logs"));
        let requests = claim
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["storage"], Quantity("2Gi".to_string()));

        let container = &pod_spec(&spec.template).containers[0];
        assert!(container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.mount_path == LOG_MOUNT_PATH));
        assert!(container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .any(|var| var.name == "ENABLE_ACCESS_LOG"));
        assert_eq!(spec.selector.match_labels.as_ref().unwrap()["statefulset"], "demo");
    }

    #[test]
    fn adopt_keeps_server_managed_fields() {
        let owner = web_server();
        let mut live = build_deployment(&owner, "img:1", "AoldA");
        live.metadata.resource_version = Some("7".to_string());
        live.spec.as_mut().unwrap().progress_deadline_seconds = Some(600);

        let mut changed = owner.clone();
        changed.spec.replicas = 5;
        let desired = build_deployment(&changed, "img:2", "AnewA");
        assert_ne!(live.state(), desired.state());

        live.adopt(desired.clone());
        assert_eq!(live.state(), desired.state());
        assert_eq!(live.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(live.spec.unwrap().progress_deadline_seconds, Some(600));
    }
}
