use std::fmt;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::time::Duration;

use crate::api::v1alpha1::webserver::{PodState, PodStatus};

pub const READY_CONDITION: &str = "Ready";
pub const DEGRADED_CONDITION: &str = "Degraded";

/// Retry after an object was created or changed and the caches need to catch up.
pub const REQUEUE_SHORT: Duration = Duration::from_millis(500);
/// Poll interval while a build is running or an image is not resolvable yet.
pub const REQUEUE_BUILD: Duration = Duration::from_secs(5);

/// Lifecycle of a build pod or OpenShift Build, normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
}

impl BuildPhase {
    /// From a pod's `status.phase`; an absent phase means the pod is not scheduled yet.
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Running") => BuildPhase::Running,
            Some("Succeeded") => BuildPhase::Complete,
            Some("Failed") => BuildPhase::Failed,
            _ => BuildPhase::Pending,
        }
    }

    /// From an OpenShift Build's `status.phase`.
    pub fn from_build_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Running") => BuildPhase::Running,
            Some("Complete") => BuildPhase::Complete,
            Some("Failed") => BuildPhase::Failed,
            Some("Error") => BuildPhase::Error,
            Some("Cancelled") => BuildPhase::Cancelled,
            _ => BuildPhase::Pending,
        }
    }

    /// A failed build stays failed until its inputs change.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildPhase::Pending => write!(f, "Pending"),
            BuildPhase::Running => write!(f, "Running"),
            BuildPhase::Complete => write!(f, "Complete"),
            BuildPhase::Failed => write!(f, "Failed"),
            BuildPhase::Error => write!(f, "Error"),
            BuildPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    InvalidSpec(String),
    BuildFailed { build: String, phase: BuildPhase },
}

impl FailureReason {
    pub fn reason(&self) -> &'static str {
        match self {
            FailureReason::InvalidSpec(_) => "InvalidSpec",
            FailureReason::BuildFailed { .. } => "BuildFailed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            FailureReason::InvalidSpec(message) => message.clone(),
            FailureReason::BuildFailed { build, phase } => {
                format!("build '{build}' ended in phase {phase}; change the build inputs to retry")
            }
        }
    }
}

/// Where a reconcile pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Provisioning,
    AcquiringImage { phase: BuildPhase },
    Deploying,
    RoutingExternal,
    Settled,
    Failed { reason: FailureReason },
}

impl ReconcileState {
    pub fn phase(&self) -> &'static str {
        match self {
            ReconcileState::Provisioning => "Provisioning",
            ReconcileState::AcquiringImage { .. } => "AcquiringImage",
            ReconcileState::Deploying => "Deploying",
            ReconcileState::RoutingExternal => "RoutingExternal",
            ReconcileState::Settled => "Settled",
            ReconcileState::Failed { .. } => "Failed",
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ReconcileState::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// `Ready` and `Degraded` conditions describing this state.
    pub fn conditions(&self, observed_generation: Option<i64>) -> [Condition; 2] {
        let condition = |type_: &str, status: bool, reason: &str, message: String| Condition {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message,
            last_transition_time: Time(Utc::now()),
            observed_generation,
        };

        let ready = match self {
            ReconcileState::Settled => condition(
                READY_CONDITION,
                true,
                "Settled",
                "All resources match the desired state".to_string(),
            ),
            ReconcileState::AcquiringImage { phase } => condition(
                READY_CONDITION,
                false,
                self.phase(),
                format!("Waiting for the application image, build is {phase}"),
            ),
            other => condition(
                READY_CONDITION,
                false,
                other.phase(),
                format!("Reconciliation is in phase {}", other.phase()),
            ),
        };

        let degraded = match self.failure() {
            Some(reason) => condition(DEGRADED_CONDITION, true, reason.reason(), reason.message()),
            None => condition(DEGRADED_CONDITION, false, "AsExpected", String::new()),
        };

        [ready, degraded]
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconcileState::AcquiringImage { phase } => write!(f, "AcquiringImage({phase})"),
            ReconcileState::Failed { reason } => write!(f, "Failed({})", reason.reason()),
            other => f.write_str(other.phase()),
        }
    }
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub state: ReconcileState,
    pub requeue_after: Option<Duration>,
}

impl Pass {
    pub fn requeue(state: ReconcileState, after: Duration) -> Self {
        Pass {
            state,
            requeue_after: Some(after),
        }
    }

    pub fn settled() -> Self {
        Pass {
            state: ReconcileState::Settled,
            requeue_after: None,
        }
    }

    /// Stop until the object changes.
    pub fn failed(reason: FailureReason) -> Self {
        Pass {
            state: ReconcileState::Failed { reason },
            requeue_after: None,
        }
    }

    pub fn action(&self) -> Action {
        match self.requeue_after {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        }
    }
}

/// Pods as reported in status, plus whether the rollout still needs watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObservation {
    pub pods: Vec<PodStatus>,
    pub active: i32,
    pub scale_down: i32,
    pub requeue: bool,
}

pub fn pod_state(pod: &Pod) -> PodState {
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.as_deref());
    let has_ip = status
        .and_then(|s| s.pod_ip.as_deref())
        .is_some_and(|ip| !ip.is_empty());
    match phase {
        Some("Running") if has_ip => PodState::Active,
        Some("Running") | Some("Pending") => PodState::Pending,
        _ => PodState::Failed,
    }
}

/// Derives status entries for the application pods.
///
/// The rollout is unfinished while the pod count differs from `replicas` or a pod has
/// no IP yet.
pub fn observe_pods(pods: &[Pod], replicas: i32) -> PodObservation {
    let mut statuses: Vec<PodStatus> = pods
        .iter()
        .map(|pod| PodStatus {
            name: pod.name_any(),
            pod_ip: pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default(),
            state: pod_state(pod),
        })
        .collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));

    let count = i32::try_from(statuses.len()).unwrap_or(i32::MAX);
    let active = i32::try_from(statuses.iter().filter(|p| p.state == PodState::Active).count())
        .unwrap_or(i32::MAX);
    let requeue = count != replicas || statuses.iter().any(|p| p.pod_ip.is_empty());

    PodObservation {
        pods: statuses,
        active,
        scale_down: (count - replicas).max(0),
        requeue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus as CorePodStatus;
    use kube::api::ObjectMeta;

    fn pod(name: &str, phase: &str, ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(CorePodStatus {
                phase: Some(phase.to_string()),
                pod_ip: ip.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn running_pods_with_ips_settle() {
        let observation = observe_pods(
            &[pod("demo-b", "Running", Some("10.0.0.2")), pod("demo-a", "Running", Some("10.0.0.1"))],
            2,
        );

        assert_eq!(observation.active, 2);
        assert!(!observation.requeue);
        assert_eq!(observation.scale_down, 0);
        assert_eq!(observation.pods[0].name, "demo-a");
        assert!(observation.pods.iter().all(|p| p.state == PodState::Active));
    }

    #[test]
    fn missing_ip_keeps_watching() {
        let observation = observe_pods(
            &[pod("demo-a", "Running", Some("10.0.0.1")), pod("demo-b", "Running", None)],
            2,
        );

        assert!(observation.requeue);
        assert_eq!(observation.active, 1);
        assert_eq!(observation.pods[1].state, PodState::Pending);
        assert_eq!(observation.pods[1].pod_ip, "");
    }

    #[test]
    fn surplus_pods_are_counted_for_scale_down() {
        let observation = observe_pods(
            &[
                pod("demo-a", "Running", Some("10.0.0.1")),
                pod("demo-b", "Running", Some("10.0.0.2")),
                pod("demo-c", "Failed", Some("10.0.0.3")),
            ],
            1,
        );

        assert!(observation.requeue);
        assert_eq!(observation.scale_down, 2);
        assert_eq!(observation.pods[2].state, PodState::Failed);
    }

    #[test]
    fn build_phases_are_normalised() {
        assert_eq!(BuildPhase::from_pod_phase(None), BuildPhase::Pending);
        assert_eq!(BuildPhase::from_pod_phase(Some("Succeeded")), BuildPhase::Complete);
        assert_eq!(BuildPhase::from_build_phase(Some("New")), BuildPhase::Pending);
        assert_eq!(BuildPhase::from_build_phase(Some("Cancelled")), BuildPhase::Cancelled);
        assert!(BuildPhase::Error.is_terminal_failure());
        assert!(!BuildPhase::Running.is_terminal_failure());
    }

    #[test]
    fn failed_state_is_degraded_and_not_ready() {
        let state = ReconcileState::Failed {
            reason: FailureReason::BuildFailed {
                build: "demo-build".to_string(),
                phase: BuildPhase::Failed,
            },
        };
        let [ready, degraded] = state.conditions(Some(3));

        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, "Failed");
        assert_eq!(degraded.status, "True");
        assert_eq!(degraded.reason, "BuildFailed");
        assert_eq!(degraded.observed_generation, Some(3));
    }

    #[test]
    fn settled_pass_waits_for_changes() {
        let [ready, degraded] = ReconcileState::Settled.conditions(None);
        assert_eq!(ready.status, "True");
        assert_eq!(degraded.status, "False");
        assert_eq!(Pass::settled().requeue_after, None);
        assert_eq!(
            Pass::requeue(ReconcileState::Deploying, REQUEUE_SHORT).requeue_after,
            Some(Duration::from_millis(500))
        );
    }
}
