mod handlers;
mod server;

use tracing::info;
use web_server::controllers::webserver_controller::{self, State};
use web_server::util::{config::OperatorConfig, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env()?;
    telemetry::init(config.log_format)?;
    info!(
        "Starting webserver-operator, watching {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );

    let state = State::default();
    let bind_address = config.bind_address.clone();
    let controller = webserver_controller::run(state.clone(), config);
    let server = server::start_server(state, &bind_address);

    // Both implement graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server
}
