//! OpenShift resource kinds the operator creates or reads.
//!
//! Only the fields the operator sets or inspects are modelled; the API server keeps
//! the rest. None of these are installed by this operator, so schema generation is off.

use k8s_openapi::api::core::v1::{EnvVar, ObjectReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    status = "RouteStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub to: RouteTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    pub termination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_name: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "image.openshift.io",
    version = "v1",
    kind = "ImageStream",
    namespaced,
    status = "ImageStreamStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_policy: Option<ImageLookupPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ImageLookupPolicy {
    pub local: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_repository: Option<String>,
    #[serde(default)]
    pub tags: Vec<NamedTagEventList>,
}

/// History of one tag, newest event first.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NamedTagEventList {
    pub tag: String,
    #[serde(default)]
    pub items: Vec<TagEvent>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagEvent {
    pub docker_image_reference: String,
    #[serde(default)]
    pub image: String,
}

impl ImageStream {
    /// Digest pull spec the `latest` tag currently points at.
    ///
    /// A new build or import adds a tag event, so the result changes whenever the
    /// image behind the tag does.
    pub fn latest_image(&self) -> Option<String> {
        self.status
            .as_ref()?
            .tags
            .iter()
            .find(|list| list.tag == "latest")?
            .items
            .first()
            .map(|event| event.docker_image_reference.clone())
            .filter(|reference| !reference.is_empty())
    }
}

/// Fields shared by BuildConfig and Build specs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonBuildSpec {
    pub source: BuildSource,
    pub strategy: BuildStrategy,
    pub output: BuildOutput,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitBuildSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GitBuildSource {
    pub uri: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategy {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_strategy: Option<SourceBuildStrategy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceBuildStrategy {
    pub from: ObjectReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_pull: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BuildOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ObjectReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildTriggerPolicy {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<WebHookTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<WebHookTrigger>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebHookTrigger {
    pub secret_reference: SecretLocalReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SecretLocalReference {
    pub name: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "build.openshift.io",
    version = "v1",
    kind = "BuildConfig",
    namespaced,
    status = "BuildConfigStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigSpec {
    #[serde(flatten)]
    pub common: CommonBuildSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<BuildTriggerPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_policy: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigStatus {
    #[serde(default)]
    pub last_version: i64,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "build.openshift.io",
    version = "v1",
    kind = "Build",
    namespaced,
    status = "BuildStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(flatten)]
    pub common: CommonBuildSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BuildStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn resource_paths_match_openshift() {
        assert_eq!(Route::plural(&()), "routes");
        assert_eq!(Route::api_version(&()), "route.openshift.io/v1");
        assert_eq!(BuildConfig::plural(&()), "buildconfigs");
        assert_eq!(Build::group(&()), "build.openshift.io");
        assert_eq!(ImageStream::plural(&()), "imagestreams");
    }

    #[test]
    fn build_config_spec_flattens_common_fields() {
        let spec: BuildConfigSpec = serde_json::from_value(serde_json::json!({
            "source": { "type": "Git", "git": { "uri": "https://example.com/app.git", "ref": "main" } },
            "strategy": { "type": "Source", "sourceStrategy": { "from": { "kind": "ImageStreamTag", "name": "webserver:latest" } } },
            "output": { "to": { "kind": "ImageStreamTag", "name": "demo:latest" } },
            "runPolicy": "Serial"
        }))
        .unwrap();

        assert_eq!(spec.common.source.git.unwrap().ref_.as_deref(), Some("main"));
        assert_eq!(spec.run_policy.as_deref(), Some("Serial"));
        assert!(spec.triggers.is_empty());
    }

    #[test]
    fn latest_image_follows_the_newest_tag_event() {
        let mut stream = ImageStream::new("demo", ImageStreamSpec::default());
        assert_eq!(stream.latest_image(), None);

        stream.status = Some(serde_json::from_value(serde_json::json!({
            "dockerImageRepository": "image-registry.svc:5000/apps/demo",
            "tags": [
                { "tag": "stable", "items": [
                    { "dockerImageReference": "image-registry.svc:5000/apps/demo@sha256:aaa", "image": "sha256:aaa" }
                ]},
                { "tag": "latest", "items": [
                    { "dockerImageReference": "image-registry.svc:5000/apps/demo@sha256:ccc", "image": "sha256:ccc" },
                    { "dockerImageReference": "image-registry.svc:5000/apps/demo@sha256:bbb", "image": "sha256:bbb" }
                ]}
            ]
        }))
        .unwrap());
        assert_eq!(
            stream.latest_image().as_deref(),
            Some("image-registry.svc:5000/apps/demo@sha256:ccc")
        );
    }

    #[test]
    fn repository_alone_is_not_an_image() {
        let mut stream = ImageStream::new("demo", ImageStreamSpec::default());
        stream.status = Some(ImageStreamStatus {
            docker_image_repository: Some("image-registry.svc:5000/apps/demo".to_string()),
            ..Default::default()
        });
        assert_eq!(stream.latest_image(), None);
    }
}
