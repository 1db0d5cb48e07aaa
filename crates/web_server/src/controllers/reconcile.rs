//! One reconcile pass over a `WebServer`.
//!
//! Steps run in a fixed order and each may stop the pass early by returning a
//! [`Pass`] that tells the controller when to look again. Only a pass that reaches
//! the end with every pod up reports `Settled`.

use std::ops::ControlFlow;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::*;

use super::webserver_controller::Context;
use super::{clustering, image};
use crate::api::openshift::Route;
use crate::api::v1alpha1::webserver::{WebServer, WebServerStatus};
use crate::resources::deployment::{build_deployment, build_stateful_set, Workload};
use crate::resources::route::{build_route, ingress_hosts};
use crate::resources::service::{adopt_routing, build_service, routing_differs};
use crate::resources::{hash_of, selector_labels, selector_string, WorkloadKind};
use crate::util::errors::{Error, Result, StdError};
use crate::util::fingerprint::fingerprint;
use crate::util::upsert::{delete_if_exists, is_owned_by, update, upsert, Upserted};
use crate::util::webserver_status::{observe_pods, FailureReason, Pass, ReconcileState, REQUEUE_SHORT};

macro_rules! step {
    ($flow:expr) => {
        match $flow {
            ControlFlow::Continue(value) => value,
            ControlFlow::Break(pass) => return Ok(pass),
        }
    };
}

fn again<T>(state: ReconcileState) -> ControlFlow<Pass, T> {
    ControlFlow::Break(Pass::requeue(state, REQUEUE_SHORT))
}

pub async fn reconcile_pass(web_server: &WebServer, ctx: Arc<Context>, status: &mut WebServerStatus) -> Result<Pass> {
    let source = match web_server.spec.validate(ctx.openshift) {
        Ok(source) => source,
        Err(violation) => {
            warn!("WebServer \"{}\" is invalid: {}", web_server.name_any(), violation);
            return Ok(Pass::failed(FailureReason::InvalidSpec(violation.to_string())));
        }
    };

    let ns = web_server
        .namespace()
        .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".to_string())))?;
    let client = &ctx.client;
    let hash = fingerprint(web_server)?;

    step!(reconcile_service(web_server, client, &ns, &hash).await?);

    if web_server.spec.use_session_clustering {
        step!(clustering::reconcile(web_server, client, &ns, &hash).await?);
    }

    let image = step!(image::acquire(web_server, source, client, &ns).await?);

    step!(deploy(web_server, client, &ns, &image, &hash).await?);

    if ctx.openshift && web_server.spec.route_enabled() {
        step!(reconcile_route(web_server, client, &ns, &hash, status).await?);
    } else {
        status.hosts.clear();
    }

    if observe(web_server, client, &ns, status).await? {
        return Ok(Pass::requeue(ReconcileState::Deploying, REQUEUE_SHORT));
    }
    Ok(Pass::settled())
}

async fn reconcile_service(web_server: &WebServer, client: &Client, ns: &str, hash: &str) -> Result<ControlFlow<Pass>> {
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let desired = build_service(web_server, hash);

    match upsert(&services, &desired).await? {
        Upserted::Created(_) => Ok(again(ReconcileState::Provisioning)),
        Upserted::Existing(mut live) if routing_differs(&live, &desired) => {
            adopt_routing(&mut live, desired);
            update(&services, &live).await?;
            Ok(again(ReconcileState::Provisioning))
        }
        Upserted::Existing(_) => Ok(ControlFlow::Continue(())),
    }
}

async fn deploy(web_server: &WebServer, client: &Client, ns: &str, image: &str, hash: &str) -> Result<ControlFlow<Pass>> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let stateful_sets: Api<StatefulSet> = Api::namespaced(client.clone(), ns);

    match WorkloadKind::of(&web_server.spec) {
        WorkloadKind::Deployment => {
            remove_stale(web_server, &stateful_sets).await?;
            rollout(&deployments, build_deployment(web_server, image, hash)).await
        }
        WorkloadKind::StatefulSet => {
            remove_stale(web_server, &deployments).await?;
            rollout(&stateful_sets, build_stateful_set(web_server, image, hash)).await
        }
    }
}

/// Deletes a workload of the kind no longer in use, if this `WebServer` owns it.
async fn remove_stale<W: Workload>(web_server: &WebServer, api: &Api<W>) -> Result<()> {
    let name = &web_server.spec.application_name;
    let stale = api
        .get_opt(name)
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
    if let Some(stale) = stale.filter(|stale| is_owned_by(stale, web_server)) {
        info!("Removing {} \"{}\" after a workload kind change", W::kind(&()), stale.name_any());
        delete_if_exists(api, name).await?;
    }
    Ok(())
}

/// At most one workload mutation per pass.
async fn rollout<W: Workload>(api: &Api<W>, desired: W) -> Result<ControlFlow<Pass>> {
    match upsert(api, &desired).await? {
        Upserted::Created(_) => Ok(again(ReconcileState::Deploying)),
        Upserted::Existing(mut live) if live.state() != desired.state() => {
            info!(
                "Rolling out {} \"{}\" (hash {:?} -> {:?})",
                W::kind(&()),
                live.name_any(),
                hash_of(&live),
                hash_of(&desired)
            );
            live.adopt(desired);
            update(api, &live).await?;
            Ok(again(ReconcileState::Deploying))
        }
        Upserted::Existing(_) => Ok(ControlFlow::Continue(())),
    }
}

async fn reconcile_route(
    web_server: &WebServer,
    client: &Client,
    ns: &str,
    hash: &str,
    status: &mut WebServerStatus,
) -> Result<ControlFlow<Pass>> {
    let routes: Api<Route> = Api::namespaced(client.clone(), ns);
    let desired = build_route(web_server, hash);

    let live = match upsert(&routes, &desired).await? {
        Upserted::Existing(mut live) if hash_of(&live) != Some(hash) => {
            live.spec = desired.spec;
            live.metadata.labels = desired.metadata.labels;
            update(&routes, &live).await?;
            return Ok(again(ReconcileState::RoutingExternal));
        }
        upserted => upserted.into_inner(),
    };

    status.hosts = ingress_hosts(&live);
    Ok(ControlFlow::Continue(()))
}

/// Records the application pods in `status`. Returns true while the rollout is unfinished.
async fn observe(web_server: &WebServer, client: &Client, ns: &str, status: &mut WebServerStatus) -> Result<bool> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), ns);
    let selector = selector_string(&selector_labels(web_server));
    let list = pods
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

    let observation = observe_pods(&list.items, web_server.spec.replicas);
    status.replicas = observation.active;
    status.scale_down = observation.scale_down;
    status.pods = observation.pods;
    status.selector = selector;
    Ok(observation.requeue)
}
