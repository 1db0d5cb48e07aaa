//! In-memory API server behind a mocked `kube::Client`.
//!
//! Requests are served from a map keyed by object path, so tests can drive the
//! reconciler through real `Api<K>` calls and then inspect or mutate the stored
//! objects between passes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};

#[derive(Clone, Default)]
pub struct FakeApiServer {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Value>,
    forbidden: BTreeSet<String>,
    requests: Vec<(Method, String)>,
    version: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// Path of a namespaced core (`v1`) object.
pub fn core_path(namespace: &str, plural: &str, name: &str) -> String {
    format!("/api/v1/namespaces/{namespace}/{plural}/{name}")
}

/// Path of a namespaced object in a named API group, `group_version` like `apps/v1`.
pub fn group_path(group_version: &str, namespace: &str, plural: &str, name: &str) -> String {
    format!("/apis/{group_version}/namespaces/{namespace}/{plural}/{name}")
}

/// Parsed request target.
struct Target {
    collection: String,
    plural: String,
    name: Option<String>,
    subresource: Option<String>,
}

impl Target {
    fn parse(path: &str) -> Option<Target> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let ns_index = match segments.first() {
            Some(&"api") => 2,
            Some(&"apis") => 3,
            _ => return None,
        };
        if segments.get(ns_index) != Some(&"namespaces") {
            return None;
        }
        let plural = segments.get(ns_index + 2)?.to_string();
        let collection = format!("/{}", segments[..ns_index + 3].join("/"));
        Some(Target {
            collection,
            plural,
            name: segments.get(ns_index + 3).map(|s| s.to_string()),
            subresource: segments.get(ns_index + 4).map(|s| s.to_string()),
        })
    }

    fn item(&self, name: &str) -> String {
        format!("{}/{}", self.collection, name)
    }
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose requests are answered by this server.
    pub fn client(&self) -> Client {
        let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let server = self.clone();
        tokio::spawn(async move {
            while let Some((request, send)) = handle.next_request().await {
                let response = server.handle(request).await;
                send.send_response(response);
            }
        });
        Client::new(mock_service, "default")
    }

    /// Stores `object` at `path` as if it had been created by someone else.
    pub fn insert(&self, path: &str, mut object: Value) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        object["metadata"]["resourceVersion"] = json!(version);
        inner.objects.insert(path.to_string(), object);
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.inner.lock().unwrap().objects.get(path).cloned()
    }

    /// Replaces the status of a stored object, like a kubelet or build controller would.
    pub fn set_status(&self, path: &str, status: Value) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let object = inner
            .objects
            .get_mut(path)
            .unwrap_or_else(|| panic!("no object at {path}"));
        object["status"] = status;
        object["metadata"]["resourceVersion"] = json!(version);
    }

    /// Makes every create of the given resource plural fail with 403.
    pub fn forbid_create(&self, plural: &str) {
        self.inner.lock().unwrap().forbidden.insert(plural.to_string());
    }

    /// Paths of objects created through POST, in order.
    pub fn created_paths(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(method, _)| method == Method::POST)
            .map(|(_, path)| path.clone())
            .collect()
    }

    /// Number of requests with the given method whose path starts with `prefix`.
    pub fn count(&self, method: Method, prefix: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, path)| *m == method && path.starts_with(prefix))
            .count()
    }

    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let query = request.uri().query().unwrap_or_default().to_string();
        let bytes = request.into_body().collect_bytes().await.unwrap();
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        let mut inner = self.inner.lock().unwrap();
        inner.requests.push((method.clone(), path.clone()));

        let Some(target) = Target::parse(&path) else {
            return status_response(StatusCode::NOT_FOUND, "NotFound", &path);
        };

        match (method, target.name.clone()) {
            (Method::GET, None) => list(&inner, &target, &query),
            (Method::GET, Some(name)) => match inner.objects.get(&target.item(&name)) {
                Some(object) => json_response(StatusCode::OK, object),
                None => status_response(StatusCode::NOT_FOUND, "NotFound", &name),
            },
            (Method::POST, None) => create(&mut inner, &target, body),
            (Method::PUT, Some(name)) => replace(&mut inner, &target, &name, body),
            (Method::PATCH, Some(name)) => patch(&mut inner, &target, &name, body),
            (Method::DELETE, Some(name)) => match inner.objects.remove(&target.item(&name)) {
                Some(object) => json_response(StatusCode::OK, &object),
                None => status_response(StatusCode::NOT_FOUND, "NotFound", &name),
            },
            _ => status_response(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", &path),
        }
    }
}

fn list(inner: &Inner, target: &Target, query: &str) -> Response<Body> {
    let selector: Vec<(String, String)> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "labelSelector")
        .flat_map(|(_, value)| {
            urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string())
                .split(',')
                .filter_map(|term| term.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        })
        .collect();

    let prefix = format!("{}/", target.collection);
    let items: Vec<Value> = inner
        .objects
        .iter()
        .filter(|(path, _)| path.starts_with(&prefix) && !path[prefix.len()..].contains('/'))
        .map(|(_, object)| object)
        .filter(|object| {
            selector
                .iter()
                .all(|(k, v)| object["metadata"]["labels"][k.as_str()].as_str() == Some(v.as_str()))
        })
        .cloned()
        .collect();

    json_response(
        StatusCode::OK,
        &json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": { "resourceVersion": inner.version.to_string() },
            "items": items,
        }),
    )
}

fn create(inner: &mut Inner, target: &Target, mut body: Value) -> Response<Body> {
    if inner.forbidden.contains(&target.plural) {
        return status_response(StatusCode::FORBIDDEN, "Forbidden", &target.plural);
    }
    let name = match body["metadata"]["name"].as_str() {
        Some(name) => name.to_string(),
        None => {
            let generated = format!(
                "{}{}",
                body["metadata"]["generateName"].as_str().unwrap_or("object-"),
                inner.version + 1
            );
            body["metadata"]["name"] = json!(generated);
            generated
        }
    };
    let path = target.item(&name);
    if inner.objects.contains_key(&path) {
        return status_response(StatusCode::CONFLICT, "AlreadyExists", &name);
    }
    let version = inner.next_version();
    body["metadata"]["resourceVersion"] = json!(version);
    body["metadata"]["uid"] = json!(format!("uid-{version}"));
    inner.objects.insert(path, body.clone());
    json_response(StatusCode::CREATED, &body)
}

fn replace(inner: &mut Inner, target: &Target, name: &str, mut body: Value) -> Response<Body> {
    let path = target.item(name);
    let Some(stored) = inner.objects.get(&path).cloned() else {
        return status_response(StatusCode::NOT_FOUND, "NotFound", name);
    };
    let expected = &stored["metadata"]["resourceVersion"];
    let given = &body["metadata"]["resourceVersion"];
    if !given.is_null() && given != expected {
        return status_response(StatusCode::CONFLICT, "Conflict", name);
    }
    let version = inner.next_version();
    let mut updated = if target.subresource.as_deref() == Some("status") {
        let mut updated = stored;
        updated["status"] = body["status"].take();
        updated
    } else {
        // Writes to the main resource never touch status
        body["status"] = stored["status"].clone();
        body
    };
    updated["metadata"]["resourceVersion"] = json!(version);
    inner.objects.insert(path, updated.clone());
    json_response(StatusCode::OK, &updated)
}

fn patch(inner: &mut Inner, target: &Target, name: &str, body: Value) -> Response<Body> {
    let path = target.item(name);
    let mut object = match inner.objects.get(&path).cloned() {
        Some(object) => object,
        None if target.subresource.is_some() => {
            return status_response(StatusCode::NOT_FOUND, "NotFound", name);
        }
        None => json!({ "metadata": { "name": name } }),
    };
    json_patch::merge(&mut object, &body);
    let version = inner.next_version();
    object["metadata"]["resourceVersion"] = json!(version);
    inner.objects.insert(path, object.clone());
    json_response(StatusCode::OK, &object)
}

fn json_response(code: StatusCode, value: &Value) -> Response<Body> {
    Response::builder()
        .status(code)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(value).unwrap()))
        .unwrap()
}

fn status_response(code: StatusCode, reason: &str, message: &str) -> Response<Body> {
    json_response(
        code,
        &json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{reason}: {message}"),
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_group_paths() {
        let target = Target::parse("/api/v1/namespaces/apps/pods/demo-0").unwrap();
        assert_eq!(target.collection, "/api/v1/namespaces/apps/pods");
        assert_eq!(target.name.as_deref(), Some("demo-0"));

        let target = Target::parse("/apis/apps/v1/namespaces/apps/deployments").unwrap();
        assert_eq!(target.plural, "deployments");
        assert!(target.name.is_none());

        let target = Target::parse("/apis/web.servers.org/v1alpha1/namespaces/apps/webservers/demo/status").unwrap();
        assert_eq!(target.subresource.as_deref(), Some("status"));
    }

    #[tokio::test]
    async fn lists_by_encoded_label_selector() {
        use k8s_openapi::api::core::v1::Pod;
        use kube::api::{Api, ListParams};

        let server = FakeApiServer::new();
        for (name, app) in [("a", "demo"), ("b", "other")] {
            server.insert(
                &core_path("apps", "pods", name),
                json!({
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {
                        "name": name,
                        "namespace": "apps",
                        "labels": { "app.kubernetes.io/name": app, "application": app }
                    }
                }),
            );
        }

        let pods: Api<Pod> = Api::namespaced(server.client(), "apps");
        let list = pods
            .list(&ListParams::default().labels("app.kubernetes.io/name=demo,application=demo"))
            .await
            .unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn status_patch_merges_into_the_stored_object() {
        use k8s_openapi::api::core::v1::Pod;
        use kube::api::{Api, Patch, PatchParams};

        let server = FakeApiServer::new();
        let path = core_path("apps", "pods", "a");
        server.insert(
            &path,
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "a", "namespace": "apps" },
                "status": { "phase": "Pending", "podIP": "10.0.0.1" }
            }),
        );

        let pods: Api<Pod> = Api::namespaced(server.client(), "apps");
        pods.patch_status(
            "a",
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": { "phase": "Running", "podIP": null } })),
        )
        .await
        .unwrap();

        let stored = server.object(&path).unwrap();
        assert_eq!(stored["status"], json!({ "phase": "Running" }));
    }
}
