use k8s_openapi::api::core::v1::{ExecAction, HTTPGetAction, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::HTTP_PORT;
use crate::api::v1alpha1::webserver::HealthCheck;

pub const HEALTH_PATH: &str = "/health";

pub fn readiness_probe(health_check: Option<&HealthCheck>) -> Probe {
    probe(health_check.and_then(|h| h.server_readiness_script.as_deref()), 5)
}

pub fn liveness_probe(health_check: Option<&HealthCheck>) -> Probe {
    probe(health_check.and_then(|h| h.server_liveness_script.as_deref()), 60)
}

fn probe(script: Option<&str>, initial_delay_seconds: i32) -> Probe {
    let script = script.map(str::trim).filter(|s| !s.is_empty());
    match script {
        Some(script) => Probe {
            exec: Some(ExecAction {
                command: Some(exec_command(script)),
            }),
            initial_delay_seconds: Some(initial_delay_seconds),
            ..Default::default()
        },
        None => Probe {
            http_get: Some(HTTPGetAction {
                path: Some(HEALTH_PATH.to_string()),
                port: IntOrString::Int(HTTP_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay_seconds),
            ..Default::default()
        },
    }
}

/// Splits `shell -c "command"` into an exec argument list.
///
/// Words before the first `"` become separate arguments and everything after it is a
/// single argument with one trailing quote removed. Scripts without a quote are run
/// by bash as a whole.
pub fn exec_command(script: &str) -> Vec<String> {
    match script.split_once('"') {
        Some((head, tail)) => {
            let tail = tail.trim_end();
            let tail = tail.strip_suffix('"').unwrap_or(tail);
            head.split_whitespace()
                .map(str::to_string)
                .chain(std::iter::once(tail.to_string()))
                .collect()
        }
        None => vec!["/bin/bash".to_string(), "-c".to_string(), script.to_string()],
    }
}
