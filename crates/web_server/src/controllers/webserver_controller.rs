use crate::api::openshift::{Build, BuildConfig, ImageStream, Route};
use crate::api::v1alpha1::webserver::WebServer;
use crate::controllers::reconcile::reconcile_pass;
use crate::resources::OWNER_LABEL;
use crate::util::config::OperatorConfig;
use crate::util::status::{find_status_condition, set_status_condition};
use crate::util::webserver_status::{FailureReason, DEGRADED_CONDITION};
use crate::util::{errors, errors::Result, metrics};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service},
    rbac::v1::RoleBinding,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

/// Requeue delay after an unexpected error.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, openshift: bool) -> Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            client,
            metrics: metrics::Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
            openshift,
        }))
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    /// Whether Route, Build and ImageStream kinds are served
    pub openshift: bool,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "webserver-operator".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

pub async fn reconcile(web_server: Arc<WebServer>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure(&web_server);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = web_server.name_any();
    let ns = web_server
        .namespace()
        .ok_or_else(|| errors::Error::StdError(errors::StdError::MetadataMissing("namespace".to_string())))?;
    let web_servers: Api<WebServer> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling WebServer \"{}\" in {}", name, ns);

    let previous = web_server.status.clone().unwrap_or_default();
    let mut status = previous.clone();
    let pass = match reconcile_pass(&web_server, ctx.clone(), &mut status).await {
        Ok(pass) => pass,
        Err(errors::Error::ErrorWithRequeue(error)) => {
            info!("WebServer \"{}\" requeued: {}", name, error);
            return Ok(Action::requeue(error.duration));
        }
        Err(e) => return Err(e),
    };
    debug!("WebServer \"{}\" pass ended in {}", name, pass.state);

    status.phase = Some(pass.state.phase().to_string());
    for condition in pass.state.conditions(web_server.metadata.generation) {
        status.conditions = set_status_condition(&status.conditions, condition).0;
    }

    if status != previous {
        web_servers
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
            .await
            .map_err(|e| errors::Error::StdError(errors::StdError::KubeError(e)))?;
    }

    // Only a failure not already on record is announced
    let announced = |failure: &FailureReason| {
        find_status_condition(&previous.conditions, DEGRADED_CONDITION).is_some_and(|c| {
            c.status == "True" && c.reason == failure.reason() && c.message == failure.message()
        })
    };
    if let Some(reason) = pass.state.failure().filter(|r| !announced(r)) {
        error!("WebServer \"{}\" failed: {}", name, reason.message());
        ctx.metrics.terminal_failure(&web_server, reason.reason());
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.reason().into(),
                    note: Some(reason.message()),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &web_server.object_ref(&()),
            )
            .await
        {
            warn!("failed to publish event for WebServer \"{}\": {}", name, e);
        }
    }

    Ok(pass.action())
}

fn error_policy(web_server: Arc<WebServer>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&web_server, error);
    Action::requeue(ERROR_REQUEUE)
}

/// Maps an application or build pod back to the `WebServer` named in its labels.
///
/// Application pods are owned by ReplicaSets, so owner references cannot be used.
fn pod_owner(pod: Pod) -> Option<ObjectRef<WebServer>> {
    let owner = pod.labels().get(OWNER_LABEL)?;
    let namespace = pod.namespace()?;
    Some(ObjectRef::new(owner).within(&namespace))
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn detect_openshift(client: &Client) -> Result<bool, kube::Error> {
    let groups = client.list_api_groups().await?;
    Ok(groups.groups.iter().any(|group| group.name == "route.openshift.io"))
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State, config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let namespace = config.watch_namespace.as_deref();

    let web_servers = scoped::<WebServer>(&client, namespace);
    if let Err(e) = web_servers.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(e.into());
    }

    let openshift = match config.openshift {
        Some(flag) => flag,
        None => detect_openshift(&client).await?,
    };
    info!(
        openshift,
        namespace = namespace.unwrap_or("<all>"),
        "Starting WebServer controller"
    );

    let mut controller = Controller::new(web_servers, Config::default().any_semantic())
        .owns(scoped::<Deployment>(&client, namespace), watcher::Config::default())
        .owns(scoped::<StatefulSet>(&client, namespace), watcher::Config::default())
        .owns(scoped::<Service>(&client, namespace), watcher::Config::default())
        .owns(scoped::<ConfigMap>(&client, namespace), watcher::Config::default())
        .owns(scoped::<RoleBinding>(&client, namespace), watcher::Config::default())
        .owns(
            scoped::<PersistentVolumeClaim>(&client, namespace),
            watcher::Config::default(),
        )
        .watches(
            scoped::<Pod>(&client, namespace),
            watcher::Config::default().labels(OWNER_LABEL),
            pod_owner,
        );

    if openshift {
        controller = controller
            .owns(scoped::<Route>(&client, namespace), watcher::Config::default())
            .owns(scoped::<BuildConfig>(&client, namespace), watcher::Config::default())
            .owns(scoped::<Build>(&client, namespace), watcher::Config::default())
            .owns(scoped::<ImageStream>(&client, namespace), watcher::Config::default());
    }

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, openshift)?)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
