pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod metrics;
pub mod status;
pub mod telemetry;
pub mod upsert;
pub mod webserver_status;

pub use errors::*;
