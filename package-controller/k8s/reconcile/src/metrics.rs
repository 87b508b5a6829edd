use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    removals: Family<OutcomeLabels, Counter>,
    duration: Histogram,
    egress_hosts: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ready,
    Skipped,
    Retrying,
    Failed,
    Removed,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Count of package reconciliations by outcome",
            reconciles.clone(),
        );

        let removals = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "removals",
            "Count of package removals by outcome",
            removals.clone(),
        );

        let duration = Histogram::new([0.05, 0.25, 1.0, 5.0, 30.0]);
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of the time taken to reconcile a package",
            Unit::Seconds,
            duration.clone(),
        );

        let egress_hosts = Gauge::default();
        reg.register(
            "egress_hosts",
            "Gauge of the number of hosts routed through the shared egress gateway",
            egress_hosts.clone(),
        );

        Self {
            reconciles,
            removals,
            duration,
            egress_hosts,
        }
    }

    pub(crate) fn reconciled(&self, outcome: Outcome, elapsed: std::time::Duration) {
        let outcome = outcome.as_str();
        self.reconciles.get_or_create(&OutcomeLabels { outcome }).inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn removed(&self, outcome: Outcome) {
        let outcome = outcome.as_str();
        self.removals.get_or_create(&OutcomeLabels { outcome }).inc();
    }

    pub(crate) fn set_egress_hosts(&self, hosts: usize) {
        self.egress_hosts.set(hosts.try_into().unwrap_or(i64::MAX));
    }

    #[cfg(test)]
    pub(crate) fn reconciles(&self, outcome: Outcome) -> u64 {
        let outcome = outcome.as_str();
        self.reconciles.get_or_create(&OutcomeLabels { outcome }).get()
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }
}
