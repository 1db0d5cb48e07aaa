use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::conditions_schema;

/// Route hostname that disables Route creation altogether.
pub const ROUTE_DISABLED: &str = "NONE";

/// Generate the Kubernetes wrapper struct `WebServer` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(kind = "WebServer", group = "web.servers.org", version = "v1alpha1", namespaced)]
#[kube(status = "WebServerStatus", shortname = "webserver")]
#[kube(
    scale = r#"{"specReplicasPath":".spec.replicas", "statusReplicasPath":".status.replicas", "labelSelectorPath":".status.selector"}"#
)]
#[kube(printcolumn = r#"{"name":"Application", "type":"string", "jsonPath":".spec.applicationName"}"#)]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".status.replicas"}"#)]
#[serde(rename_all = "camelCase")]
pub struct WebServerSpec {
    /// Name given to every generated object. Must be a DNS label.
    #[schemars(length(min = 1, max = 63), regex(pattern = r"^[a-z]([-a-z0-9]*[a-z0-9])?$"))]
    pub application_name: String,

    #[schemars(range(min = 0))]
    pub replicas: i32,

    #[serde(default)]
    pub use_session_clustering: bool,

    /// Deploy a pre-built image, optionally layering a web application built from source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_image: Option<WebImage>,

    /// Deploy from an OpenShift image stream, optionally building sources into it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_image_stream: Option<WebImageStream>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,

    /// Keep server logs on a volume claim per pod. Switches the workload to a StatefulSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_logs: Option<PersistentLogs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<VolumeSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebImage {
    pub application_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app: Option<WebApp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_server_health_check: Option<HealthCheck>,
}

/// A web application built from source and layered on top of the application image.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebApp {
    /// File name of the deployed archive.
    #[serde(default = "default_web_app_name")]
    pub name: String,
    pub source_repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    /// Image the build pushes and the workload then runs.
    pub web_app_war_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app_war_image_push_secret: Option<String>,
    pub builder: Builder,
}

fn default_web_app_name() -> String {
    "ROOT.war".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Builder {
    pub image: String,
    /// Replaces the generated build script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_build_script: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebImageStream {
    pub image_stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_stream_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_sources: Option<WebSources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_server_health_check: Option<HealthCheck>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebSources {
    pub source_repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_sources_params: Option<WebSourcesParams>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebSourcesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maven_mirror_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_webhook_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_webhook_secret: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_readiness_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_liveness_script: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Host of the Route. `NONE` skips the Route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_hostname: Option<String>,
    /// Secret holding `tls.crt` and `tls.key` for the server's HTTPS connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
    /// `required`, `optional` or unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_verification: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentLogs {
    #[serde(default)]
    pub catalina_logs: bool,
    #[serde(default)]
    pub enable_access_logs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default = "default_log_volume_size")]
    pub size: String,
}

fn default_log_volume_size() -> String {
    "1Gi".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Secrets mounted read-only under `/secrets/<name>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    /// ConfigMaps mounted read-only under `/configmaps/<name>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<String>,
}

/// The status object of `WebServer`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebServerStatus {
    /// Pods currently serving (ACTIVE).
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub pods: Vec<PodStatus>,
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Live pods above the desired replica count.
    #[serde(default)]
    pub scale_down: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub name: String,
    #[serde(rename = "podIP", default)]
    pub pod_ip: String,
    pub state: PodState,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PodState {
    Active,
    #[default]
    Pending,
    Failed,
}

/// The image-acquisition mode selected by a valid spec.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ImageSource<'a> {
    Image(&'a WebImage),
    Stream(&'a WebImageStream),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecViolation {
    #[error("neither webImage nor webImageStream is set")]
    NoImageSource,
    #[error("webImage and webImageStream are mutually exclusive")]
    ConflictingImageSources,
    #[error("replicas must not be negative, got {0}")]
    NegativeReplicas(i32),
    #[error("applicationName '{0}' is not a valid DNS label")]
    InvalidApplicationName(String),
    #[error("webImageStream requires an OpenShift cluster")]
    ImageStreamRequiresOpenShift,
}

impl WebServerSpec {
    /// Checks the invariants the reconcile loop relies on and returns the selected image source.
    pub fn validate(&self, openshift: bool) -> Result<ImageSource<'_>, SpecViolation> {
        if !is_dns_label(&self.application_name) {
            return Err(SpecViolation::InvalidApplicationName(self.application_name.clone()));
        }
        if self.replicas < 0 {
            return Err(SpecViolation::NegativeReplicas(self.replicas));
        }
        match (&self.web_image, &self.web_image_stream) {
            (Some(_), Some(_)) => Err(SpecViolation::ConflictingImageSources),
            (None, None) => Err(SpecViolation::NoImageSource),
            (Some(image), None) => Ok(ImageSource::Image(image)),
            (None, Some(_)) if !openshift => Err(SpecViolation::ImageStreamRequiresOpenShift),
            (None, Some(stream)) => Ok(ImageSource::Stream(stream)),
        }
    }

    pub fn health_check(&self) -> Option<&HealthCheck> {
        self.web_image
            .as_ref()
            .and_then(|image| image.web_server_health_check.as_ref())
            .or_else(|| {
                self.web_image_stream
                    .as_ref()
                    .and_then(|stream| stream.web_server_health_check.as_ref())
            })
    }

    pub fn image_pull_secret(&self) -> Option<&str> {
        self.web_image
            .as_ref()
            .and_then(|image| image.image_pull_secret.as_deref())
    }

    pub fn tls_secret(&self) -> Option<&str> {
        self.tls_config
            .as_ref()
            .and_then(|tls| tls.tls_secret.as_deref())
    }

    pub fn route_hostname(&self) -> Option<&str> {
        self.tls_config
            .as_ref()
            .and_then(|tls| tls.route_hostname.as_deref())
            .filter(|host| !host.is_empty())
    }

    pub fn route_enabled(&self) -> bool {
        self.route_hostname() != Some(ROUTE_DISABLED)
    }

    pub fn uses_stateful_set(&self) -> bool {
        self.persistent_logs.is_some()
    }
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    bytes.len() <= 63
        && first.is_ascii_lowercase()
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(web_image: bool, web_image_stream: bool) -> WebServerSpec {
        WebServerSpec {
            application_name: "demo".to_string(),
            replicas: 1,
            web_image: web_image.then(|| WebImage {
                application_image: "quay.io/demo/app:1".to_string(),
                ..Default::default()
            }),
            web_image_stream: web_image_stream.then(|| WebImageStream {
                image_stream_name: "webserver".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn exactly_one_image_source_is_accepted() {
        assert!(matches!(spec_with(true, false).validate(false), Ok(ImageSource::Image(_))));
        assert!(matches!(spec_with(false, true).validate(true), Ok(ImageSource::Stream(_))));
        assert_eq!(
            spec_with(true, true).validate(true),
            Err(SpecViolation::ConflictingImageSources)
        );
        assert_eq!(spec_with(false, false).validate(true), Err(SpecViolation::NoImageSource));
    }

    #[test]
    fn image_stream_needs_openshift() {
        assert_eq!(
            spec_with(false, true).validate(false),
            Err(SpecViolation::ImageStreamRequiresOpenShift)
        );
    }

    #[test]
    fn rejects_bad_names_and_replicas() {
        let mut spec = spec_with(true, false);
        spec.replicas = -1;
        assert_eq!(spec.validate(false), Err(SpecViolation::NegativeReplicas(-1)));

        let too_long = "a".repeat(64);
        for name in ["", "Demo", "1demo", "demo-", "de_mo", too_long.as_str()] {
            let mut spec = spec_with(true, false);
            spec.application_name = name.to_string();
            assert!(
                matches!(spec.validate(false), Err(SpecViolation::InvalidApplicationName(_))),
                "{name} should be rejected"
            );
        }
        for name in ["a", "demo", "my-app-2"] {
            let mut spec = spec_with(true, false);
            spec.application_name = name.to_string();
            assert!(spec.validate(false).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn route_hostname_none_disables_route() {
        let mut spec = spec_with(true, false);
        assert!(spec.route_enabled());
        spec.tls_config = Some(TlsConfig {
            route_hostname: Some("NONE".to_string()),
            ..Default::default()
        });
        assert!(!spec.route_enabled());
    }

    #[test]
    fn status_serializes_with_upstream_field_names() {
        let status = WebServerStatus {
            pods: vec![PodStatus {
                name: "demo-0".to_string(),
                pod_ip: "10.0.0.1".to_string(),
                state: PodState::Active,
            }],
            scale_down: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["pods"][0]["podIP"], "10.0.0.1");
        assert_eq!(value["pods"][0]["state"], "ACTIVE");
        assert_eq!(value["scaleDown"], 1);
    }
}
