//! Objects that turn sources into the image the workload runs.
//!
//! Two flavours exist. A web image with a `webApp` is built by a plain Pod that pushes
//! `webAppWarImage`; an image stream with `webSources` is built by an OpenShift
//! BuildConfig into an ImageStream owned by the `WebServer`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, ObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, SecretVolumeSource, SecurityContext, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use serde::Serialize;

use super::{core_labels, object_labels, object_meta, BUILD_LABEL, HASH_LABEL};
use crate::api::openshift::{
    Build, BuildConfig, BuildConfigSpec, BuildOutput, BuildSource, BuildSpec, BuildStrategy,
    BuildTriggerPolicy, CommonBuildSpec, GitBuildSource, ImageLookupPolicy, ImageStream,
    ImageStreamSpec, SecretLocalReference, SourceBuildStrategy, WebHookTrigger,
};
use crate::api::v1alpha1::webserver::{WebApp, WebImage, WebImageStream, WebServer, WebSources};
use crate::util::errors::Result;
use crate::util::fingerprint::digest;

pub const BUILD_MOUNT_PATH: &str = "/build";
pub const BUILD_CONFIG_LABEL: &str = "openshift.io/build-config.name";

/// Generated build script. It clones the sources, packages the archive and pushes an
/// image layering it on top of the application image.
pub const DEFAULT_BUILD_SCRIPT: &str = r#"set -e
mkdir -p /build/src /build/deployments
git clone --depth 1 ${SOURCE_REPOSITORY_REF:+--branch "$SOURCE_REPOSITORY_REF"} "$SOURCE_REPOSITORY_URL" /build/src
cd "/build/src/${CONTEXT_DIR}"
mvn -B -q clean package -DskipTests
cp target/*.war "/build/deployments/${WEBAPP_NAME}"
cat > /build/Containerfile <<EOF
FROM ${APPLICATION_IMAGE}
COPY deployments/${WEBAPP_NAME} /deployments/
EOF
buildah bud --isolation=chroot -t "${WEBAPP_WAR_IMAGE}" -f /build/Containerfile /build
buildah push "${WEBAPP_WAR_IMAGE}"
"#;

pub fn build_name(web_server: &WebServer) -> String {
    format!("{}-build", web_server.spec.application_name)
}

#[derive(Serialize)]
struct PodBuildInputs<'a> {
    application_image: &'a str,
    web_app: &'a WebApp,
}

/// Fingerprint of the inputs of a build pod. Nothing else may trigger a rebuild.
pub fn pod_build_fingerprint(image: &WebImage, web_app: &WebApp) -> Result<String> {
    digest(&PodBuildInputs {
        application_image: &image.application_image,
        web_app,
    })
}

#[derive(Serialize)]
struct StreamBuildInputs<'a> {
    stream: &'a str,
    namespace: &'a str,
    sources: &'a WebSources,
}

/// Fingerprint of the inputs of a BuildConfig.
pub fn stream_build_fingerprint(
    stream: &WebImageStream,
    stream_namespace: &str,
    sources: &WebSources,
) -> Result<String> {
    digest(&StreamBuildInputs {
        stream: &stream.image_stream_name,
        namespace: stream_namespace,
        sources,
    })
}

fn build_labels(web_server: &WebServer, hash: &str) -> BTreeMap<String, String> {
    let mut labels = core_labels(web_server);
    labels.insert(BUILD_LABEL.to_string(), web_server.spec.application_name.clone());
    labels.insert(HASH_LABEL.to_string(), hash.to_string());
    labels
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Workspace claim shared by consecutive runs of the build pod.
pub fn build_pvc(web_server: &WebServer, hash: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: object_meta(web_server, build_name(web_server), build_labels(web_server, hash)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("1Gi".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_pod(web_server: &WebServer, image: &WebImage, web_app: &WebApp, hash: &str) -> Pod {
    let script = web_app
        .builder
        .application_build_script
        .clone()
        .filter(|script| !script.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BUILD_SCRIPT.to_string());

    let mut env_vars = vec![
        env("SOURCE_REPOSITORY_URL", web_app.source_repository_url.clone()),
        env(
            "SOURCE_REPOSITORY_REF",
            web_app.source_repository_ref.clone().unwrap_or_default(),
        ),
        env("CONTEXT_DIR", web_app.context_dir.clone().unwrap_or_default()),
        env("WEBAPP_NAME", web_app.name.clone()),
        env("APPLICATION_IMAGE", image.application_image.clone()),
        env("WEBAPP_WAR_IMAGE", web_app.web_app_war_image.clone()),
    ];

    let mut mounts = vec![VolumeMount {
        name: "workspace".to_string(),
        mount_path: BUILD_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: "workspace".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: build_name(web_server),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(secret) = &web_app.web_app_war_image_push_secret {
        env_vars.push(env("REGISTRY_AUTH_FILE", "/auth/.dockerconfigjson"));
        mounts.push(VolumeMount {
            name: "push-secret".to_string(),
            mount_path: "/auth".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "push-secret".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    Pod {
        metadata: object_meta(web_server, build_name(web_server), build_labels(web_server, hash)),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "war".to_string(),
                image: Some(web_app.builder.image.clone()),
                command: Some(vec!["/bin/bash".to_string(), "-c".to_string(), script]),
                env: Some(env_vars),
                volume_mounts: Some(mounts),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    }
}

/// Output stream receiving the built image.
pub fn build_image_stream(web_server: &WebServer, hash: &str) -> ImageStream {
    ImageStream {
        metadata: object_meta(
            web_server,
            web_server.spec.application_name.clone(),
            object_labels(web_server, hash),
        ),
        spec: ImageStreamSpec {
            lookup_policy: Some(ImageLookupPolicy { local: true }),
        },
        status: None,
    }
}

fn image_stream_tag(name: &str, namespace: Option<&str>) -> ObjectReference {
    ObjectReference {
        kind: Some("ImageStreamTag".to_string()),
        name: Some(format!("{name}:latest")),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn webhook(type_: &str, secret: &str) -> BuildTriggerPolicy {
    let trigger = WebHookTrigger {
        secret_reference: SecretLocalReference {
            name: secret.to_string(),
        },
    };
    match type_ {
        "GitHub" => BuildTriggerPolicy {
            type_: type_.to_string(),
            github: Some(trigger),
            ..Default::default()
        },
        _ => BuildTriggerPolicy {
            type_: type_.to_string(),
            generic: Some(trigger),
            ..Default::default()
        },
    }
}

/// Source-to-image build of `sources` on top of the builder stream.
pub fn build_build_config(
    web_server: &WebServer,
    stream: &WebImageStream,
    stream_namespace: &str,
    sources: &WebSources,
    hash: &str,
) -> BuildConfig {
    let params = sources.web_sources_params.clone().unwrap_or_default();

    let mut env_vars = Vec::new();
    if let Some(mirror) = params.maven_mirror_url.filter(|v| !v.is_empty()) {
        env_vars.push(env("MAVEN_MIRROR_URL", mirror));
    }
    if let Some(dir) = params.artifact_dir.filter(|v| !v.is_empty()) {
        env_vars.push(env("ARTIFACT_DIR", dir));
    }

    let mut triggers = Vec::new();
    if let Some(secret) = params.generic_webhook_secret.as_deref() {
        triggers.push(webhook("Generic", secret));
    }
    if let Some(secret) = params.github_webhook_secret.as_deref() {
        triggers.push(webhook("GitHub", secret));
    }

    BuildConfig {
        metadata: object_meta(
            web_server,
            web_server.spec.application_name.clone(),
            build_labels(web_server, hash),
        ),
        spec: BuildConfigSpec {
            common: CommonBuildSpec {
                source: BuildSource {
                    type_: "Git".to_string(),
                    git: Some(GitBuildSource {
                        uri: sources.source_repository_url.clone(),
                        ref_: sources.source_repository_ref.clone(),
                    }),
                    context_dir: sources.context_dir.clone(),
                },
                strategy: BuildStrategy {
                    type_: "Source".to_string(),
                    source_strategy: Some(SourceBuildStrategy {
                        from: image_stream_tag(&stream.image_stream_name, Some(stream_namespace)),
                        env: env_vars,
                        force_pull: Some(true),
                    }),
                },
                output: BuildOutput {
                    to: Some(image_stream_tag(&web_server.spec.application_name, None)),
                },
            },
            triggers,
            run_policy: Some("Serial".to_string()),
        },
        status: None,
    }
}

/// A Build instantiated from the live BuildConfig, the way `oc start-build` does.
pub fn build_from_config(web_server: &WebServer, build_config: &BuildConfig) -> Build {
    let config_name = build_config.name_any();
    let mut labels = build_config.labels().clone();
    labels.insert(BUILD_CONFIG_LABEL.to_string(), config_name.clone());

    let mut metadata = object_meta(web_server, config_name.clone(), labels);
    metadata.annotations = Some(BTreeMap::from([(BUILD_CONFIG_LABEL.to_string(), config_name)]));

    Build {
        metadata,
        spec: BuildSpec {
            common: build_config.spec.common.clone(),
        },
        status: None,
    }
}
