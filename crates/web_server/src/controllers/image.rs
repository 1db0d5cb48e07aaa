//! Resolving the image the workload runs, building it first where the spec asks for it.

use std::ops::ControlFlow;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::*;

use crate::api::openshift::{Build, BuildConfig, ImageStream};
use crate::api::v1alpha1::webserver::{ImageSource, WebApp, WebImage, WebImageStream, WebServer, WebSources};
use crate::resources::build::{
    build_build_config, build_from_config, build_image_stream, build_name, build_pod, build_pvc,
    pod_build_fingerprint, stream_build_fingerprint,
};
use crate::resources::hash_of;
use crate::util::errors::{Error, Result, StdError};
use crate::util::upsert::{delete_if_exists, upsert, Upserted};
use crate::util::webserver_status::{
    BuildPhase, FailureReason, Pass, ReconcileState, REQUEUE_BUILD, REQUEUE_SHORT,
};

fn waiting<T>(phase: BuildPhase, after: tokio::time::Duration) -> ControlFlow<Pass, T> {
    ControlFlow::Break(Pass::requeue(ReconcileState::AcquiringImage { phase }, after))
}

/// Continues once a build completed, fails on a terminal phase and polls otherwise.
fn await_build(build: String, phase: BuildPhase) -> ControlFlow<Pass> {
    if phase == BuildPhase::Complete {
        return ControlFlow::Continue(());
    }
    if phase.is_terminal_failure() {
        error!("Build \"{}\" ended in phase {}", build, phase);
        return ControlFlow::Break(Pass::failed(FailureReason::BuildFailed { build, phase }));
    }
    info!("Build \"{}\" is {}, checking again shortly", build, phase);
    waiting(phase, REQUEUE_BUILD)
}

pub async fn acquire(
    web_server: &WebServer,
    source: ImageSource<'_>,
    client: &Client,
    ns: &str,
) -> Result<ControlFlow<Pass, String>> {
    match source {
        ImageSource::Image(image) => match &image.web_app {
            Some(web_app) => build_with_pod(web_server, image, web_app, client, ns).await,
            None => Ok(ControlFlow::Continue(image.application_image.clone())),
        },
        ImageSource::Stream(stream) => {
            let stream_ns = stream
                .image_stream_namespace
                .as_deref()
                .filter(|namespace| !namespace.is_empty())
                .unwrap_or(ns);
            match &stream.web_sources {
                Some(sources) => build_with_build_config(web_server, stream, stream_ns, sources, client, ns).await,
                None => resolve_stream(client, stream_ns, &stream.image_stream_name).await,
            }
        }
    }
}

async fn build_with_pod(
    web_server: &WebServer,
    image: &WebImage,
    web_app: &WebApp,
    client: &Client,
    ns: &str,
) -> Result<ControlFlow<Pass, String>> {
    let hash = pod_build_fingerprint(image, web_app)?;

    let claims: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), ns);
    upsert(&claims, &build_pvc(web_server, &hash)).await?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), ns);
    let pod = match upsert(&pods, &build_pod(web_server, image, web_app, &hash)).await? {
        Upserted::Created(_) => return Ok(waiting(BuildPhase::Pending, REQUEUE_BUILD)),
        Upserted::Existing(pod) => pod,
    };

    if hash_of(&pod) != Some(hash.as_str()) {
        info!("Build inputs of \"{}\" changed, replacing the build pod", web_server.spec.application_name);
        delete_if_exists(&pods, &build_name(web_server)).await?;
        return Ok(waiting(BuildPhase::Pending, REQUEUE_SHORT));
    }

    let phase = BuildPhase::from_pod_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref()));
    Ok(match await_build(pod.name_any(), phase) {
        ControlFlow::Continue(()) => ControlFlow::Continue(web_app.web_app_war_image.clone()),
        ControlFlow::Break(pass) => ControlFlow::Break(pass),
    })
}

async fn build_with_build_config(
    web_server: &WebServer,
    stream: &WebImageStream,
    stream_ns: &str,
    sources: &WebSources,
    client: &Client,
    ns: &str,
) -> Result<ControlFlow<Pass, String>> {
    let hash = stream_build_fingerprint(stream, stream_ns, sources)?;
    let name = web_server.spec.application_name.as_str();

    let streams: Api<ImageStream> = Api::namespaced(client.clone(), ns);
    upsert(&streams, &build_image_stream(web_server, &hash)).await?;

    let configs: Api<BuildConfig> = Api::namespaced(client.clone(), ns);
    let builds: Api<Build> = Api::namespaced(client.clone(), ns);
    let desired = build_build_config(web_server, stream, stream_ns, sources, &hash);
    let config = match upsert(&configs, &desired).await? {
        Upserted::Existing(config) if hash_of(&config) != Some(hash.as_str()) => {
            info!("Build inputs of \"{}\" changed, replacing the build", name);
            delete_if_exists(&configs, name).await?;
            delete_if_exists(&builds, name).await?;
            return Ok(waiting(BuildPhase::Pending, REQUEUE_SHORT));
        }
        upserted => upserted.into_inner(),
    };

    let build = builds
        .get_opt(name)
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
    let Some(build) = build else {
        upsert(&builds, &build_from_config(web_server, &config)).await?;
        return Ok(waiting(BuildPhase::Pending, REQUEUE_BUILD));
    };

    let phase = BuildPhase::from_build_phase(build.status.as_ref().and_then(|s| s.phase.as_deref()));
    match await_build(build.name_any(), phase) {
        ControlFlow::Continue(()) => resolve_stream(client, ns, name).await,
        ControlFlow::Break(pass) => Ok(ControlFlow::Break(pass)),
    }
}

/// The image behind the stream's `latest` tag, waiting while the stream or tag is missing.
async fn resolve_stream(client: &Client, ns: &str, name: &str) -> Result<ControlFlow<Pass, String>> {
    let streams: Api<ImageStream> = Api::namespaced(client.clone(), ns);
    let stream = streams
        .get_opt(name)
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

    match stream.as_ref().and_then(ImageStream::latest_image) {
        Some(image) => Ok(ControlFlow::Continue(image)),
        None => {
            info!("ImageStream \"{}/{}\" has no latest image yet", ns, name);
            Ok(waiting(BuildPhase::Pending, REQUEUE_BUILD))
        }
    }
}
