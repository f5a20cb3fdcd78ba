use frontdoor_core::pipeline::Stage;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
    unavailable: Family<TargetLabels, Counter>,
    upstream_errors: Family<TargetLabels, Counter>,
}

#[derive(Clone, Debug)]
pub struct EdgeMetrics {
    forwarded: Counter,
    upstream_errors: Counter,
}

#[derive(Clone, Debug)]
pub struct PipelineMetrics {
    stages: Family<StageLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    rule: String,
    action: ActionLabel,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum ActionLabel {
    Forward,
    FixedResponse,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TargetLabels {
    target_group: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StageLabels {
    stage: &'static str,
    outcome: StageOutcome,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum StageOutcome {
    Succeeded,
    Failed,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let decisions = Family::<DecisionLabels, Counter>::default();
        reg.register(
            "decisions",
            "Total number of requests evaluated by the listener, by matched rule",
            decisions.clone(),
        );

        let unavailable = Family::<TargetLabels, Counter>::default();
        reg.register(
            "unavailable",
            "Total number of forwarded requests that found no healthy target",
            unavailable.clone(),
        );

        let upstream_errors = Family::<TargetLabels, Counter>::default();
        reg.register(
            "upstream_errors",
            "Total number of forwarded requests that failed to reach a target",
            upstream_errors.clone(),
        );

        Self {
            decisions,
            unavailable,
            upstream_errors,
        }
    }

    pub(crate) fn decision(&self, rule: &str, action: ActionLabel) {
        self.decisions
            .get_or_create(&DecisionLabels {
                rule: rule.to_string(),
                action,
            })
            .inc();
    }

    pub(crate) fn unavailable(&self, target_group: &str) {
        self.unavailable
            .get_or_create(&TargetLabels {
                target_group: target_group.to_string(),
            })
            .inc();
    }

    pub(crate) fn upstream_error(&self, target_group: &str) {
        self.upstream_errors
            .get_or_create(&TargetLabels {
                target_group: target_group.to_string(),
            })
            .inc();
    }
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === impl EdgeMetrics ===

impl EdgeMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let forwarded = Counter::default();
        reg.register(
            "forwarded",
            "Total number of requests forwarded to the origin",
            forwarded.clone(),
        );

        let upstream_errors = Counter::default();
        reg.register(
            "upstream_errors",
            "Total number of requests that failed to reach the origin",
            upstream_errors.clone(),
        );

        Self {
            forwarded,
            upstream_errors,
        }
    }

    pub(crate) fn forwarded(&self) {
        self.forwarded.inc();
    }

    pub(crate) fn upstream_error(&self) {
        self.upstream_errors.inc();
    }
}

impl Default for EdgeMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === impl PipelineMetrics ===

impl PipelineMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let stages = Family::<StageLabels, Counter>::default();
        reg.register(
            "stages",
            "Total number of pipeline stage executions, by outcome",
            stages.clone(),
        );
        Self { stages }
    }

    pub(crate) fn stage(&self, stage: Stage, outcome: StageOutcome) {
        self.stages
            .get_or_create(&StageLabels {
                stage: stage.as_str(),
                outcome,
            })
            .inc();
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
