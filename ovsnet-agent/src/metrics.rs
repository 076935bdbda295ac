use std::sync::{LazyLock, PoisonError, RwLock};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;

use crate::Error;

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("ovsnet")));

#[derive(Clone)]
pub struct DriverMetrics {
    pub operations: Family<OperationLabels, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: Histogram,
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self {
            operations: Family::<OperationLabels, Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: Histogram::new([0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0].into_iter()),
        }
    }
}

impl DriverMetrics {
    /// Register driver metrics to start tracking them.
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "endpoint_operation_duration",
            "endpoint operation duration",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register(
            "endpoint_operations",
            "Number of endpoint operations",
            self.operations.clone(),
        );
        r.register(
            "endpoint_failures",
            "Number of failed endpoint operations",
            self.failures.clone(),
        );
        self
    }

    /// Registered with the process wide [`REGISTRY`].
    pub fn registered() -> Self {
        let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
        Self::default().register(&mut registry)
    }

    pub fn count_failure(&self, operation: &'static str, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                operation: operation.into(),
                error: e.metric_label().into(),
            })
            .inc();
    }

    pub fn count_and_measure(&self, operation: &'static str) -> OperationMeasurer {
        self.operations
            .get_or_create(&OperationLabels {
                operation: operation.into(),
            })
            .inc();
        OperationMeasurer {
            start: Instant::now(),
            metric: self.duration.clone(),
        }
    }
}

pub struct OperationMeasurer {
    start: Instant,
    metric: Histogram,
}

impl Drop for OperationMeasurer {
    fn drop(&mut self) {
        self.metric.observe(self.start.elapsed().as_secs_f64());
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub operation: String,
    pub error: String,
}
