use std::ops::ControlFlow;

use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::Api;
use kube::Client;
use tracing::*;

use crate::api::v1alpha1::webserver::WebServer;
use crate::resources::clustering::{build_config_map, build_role_binding, role_binding_name, Discovery};
use crate::resources::service::{adopt_routing, build_headless_service, headless_service_name, routing_differs};
use crate::util::errors::{Error, Result, StdError};
use crate::util::upsert::{update, upsert, Upserted};
use crate::util::webserver_status::{Pass, ReconcileState, REQUEUE_SHORT};

fn provisioning<T>() -> ControlFlow<Pass, T> {
    ControlFlow::Break(Pass::requeue(ReconcileState::Provisioning, REQUEUE_SHORT))
}

/// Picks the discovery mechanism, creating what it needs.
///
/// Kubernetes discovery is preferred. When the operator may not grant the `view` role,
/// members fall back to resolving a headless service.
async fn discovery(web_server: &WebServer, client: &Client, ns: &str, hash: &str) -> Result<ControlFlow<Pass, Discovery>> {
    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), ns);
    let services: Api<Service> = Api::namespaced(client.clone(), ns);

    let role_binding = role_bindings
        .get_opt(&role_binding_name(web_server))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
    if role_binding.is_some() {
        return Ok(ControlFlow::Continue(Discovery::Kubernetes));
    }

    let headless = services
        .get_opt(&headless_service_name(web_server))
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;
    if let Some(mut live) = headless {
        let desired = build_headless_service(web_server, hash);
        if routing_differs(&live, &desired) {
            info!("Headless service of \"{}\" changed", web_server.spec.application_name);
            adopt_routing(&mut live, desired);
            update(&services, &live).await?;
            return Ok(provisioning());
        }
        return Ok(ControlFlow::Continue(Discovery::Dns));
    }

    match upsert(&role_bindings, &build_role_binding(web_server, hash)).await {
        Ok(_) => Ok(provisioning()),
        Err(e) if e.is_api_code(403) => {
            warn!(
                "Not allowed to bind the view role for \"{}\", using DNS discovery",
                web_server.spec.application_name
            );
            upsert(&services, &build_headless_service(web_server, hash)).await?;
            Ok(provisioning())
        }
        Err(e) => Err(e),
    }
}

pub async fn reconcile(web_server: &WebServer, client: &Client, ns: &str, hash: &str) -> Result<ControlFlow<Pass>> {
    let discovery = match discovery(web_server, client, ns, hash).await? {
        ControlFlow::Continue(discovery) => discovery,
        ControlFlow::Break(pass) => return Ok(ControlFlow::Break(pass)),
    };

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), ns);
    let desired = build_config_map(web_server, discovery, hash);
    match upsert(&config_maps, &desired).await? {
        Upserted::Created(_) => Ok(provisioning()),
        Upserted::Existing(mut live) if live.data != desired.data => {
            info!("Clustering configuration of \"{}\" changed", web_server.spec.application_name);
            live.data = desired.data;
            live.metadata.labels = desired.metadata.labels;
            update(&config_maps, &live).await?;
            Ok(provisioning())
        }
        Upserted::Existing(_) => Ok(ControlFlow::Continue(())),
    }
}
