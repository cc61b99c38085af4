use prometheus_client::{metrics::counter::Counter, registry::Registry};

#[derive(Clone, Debug, Default)]
pub struct StatusMetrics {
    updates: Counter,
    update_failures: Counter,
}

impl StatusMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let updates = Counter::default();
        prom.register(
            "updates",
            "Count of Ingress status updates written",
            updates.clone(),
        );

        let update_failures = Counter::default();
        prom.register(
            "update_failures",
            "Count of Ingress status updates that failed",
            update_failures.clone(),
        );

        Self {
            updates,
            update_failures,
        }
    }

    pub(crate) fn updated(&self) {
        self.updates.inc();
    }

    pub(crate) fn failed(&self) {
        self.update_failures.inc();
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> (u64, u64) {
        (self.updates.get(), self.update_failures.get())
    }
}
