use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    applies: Family<KindLabels, Counter>,
    deletes: Family<KindLabels, Counter>,
    resets: Family<KindLabels, Counter>,
    recomputes: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let applies = Family::default();
        prom.register(
            "applies",
            "Count of resources applied to the index",
            applies.clone(),
        );

        let deletes = Family::default();
        prom.register(
            "deletes",
            "Count of resources deleted from the index",
            deletes.clone(),
        );

        let resets = Family::default();
        prom.register("resets", "Count of index resets", resets.clone());

        let recomputes = Family::default();
        prom.register(
            "recomputes",
            "Count of changes that requested a configuration recompute",
            recomputes.clone(),
        );

        Self {
            applies,
            deletes,
            resets,
            recomputes,
        }
    }

    pub(crate) fn apply(&self, kind: &'static str) {
        self.applies.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn delete(&self, kind: &'static str) {
        self.deletes.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn reset(&self, kind: &'static str) {
        self.resets.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn recompute(&self, kind: &'static str) {
        self.recomputes.get_or_create(&KindLabels { kind }).inc();
    }
}
