use crate::api::v1alpha1::webserver::WebServer;
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub terminal_failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

#[allow(clippy::expect_used)]
impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )
        .expect("static histogram options are valid");
        let failures = IntCounterVec::new(
            opts!("controller_reconciliation_errors_total", "reconciliation errors",),
            &["instance", "error"],
        )
        .expect("static counter options are valid");
        let terminal_failures = IntCounterVec::new(
            opts!(
                "webserver_terminal_failures_total",
                "reconciliations that stopped until the spec changes",
            ),
            &["instance", "reason"],
        )
        .expect("static counter options are valid");
        let reconciliations =
            IntCounter::new("reconciliations_total", "reconciliations").expect("static counter options are valid");
        Metrics {
            reconciliations,
            failures,
            terminal_failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.terminal_failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, web_server: &WebServer, e: &Error) {
        self.failures
            .with_label_values(&[web_server.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn terminal_failure(&self, web_server: &WebServer, reason: &str) {
        self.terminal_failures
            .with_label_values(&[web_server.name_any().as_str(), reason])
            .inc()
    }

    pub fn count_and_measure(&self, web_server: &WebServer) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: web_server.name_any(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}
