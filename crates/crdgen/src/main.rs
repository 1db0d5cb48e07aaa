use kube::CustomResourceExt as _;
use web_server::api::v1alpha1::webserver::WebServer;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&WebServer::crd())?);
    Ok(())
}
