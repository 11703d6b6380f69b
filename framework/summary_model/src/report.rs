use crate::stat::SummaryStat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a single scenario within a run.
///
/// `Pending -> Ramping <-> Steady -> Draining -> Done`. A scenario cancelled while still pending
/// moves straight to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPhase {
    /// Waiting for the scenario's start time.
    Pending,
    /// Inside a stage that changes the number of virtual users.
    Ramping,
    /// Inside a stage that holds the number of virtual users flat.
    Steady,
    /// All stages are finished, waiting out the graceful stop.
    Draining,
    /// All virtual users have stopped.
    Done,
}

/// What happened to one scenario during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    /// The last phase the scenario reached. This is [ScenarioPhase::Done] for every scenario in
    /// a report produced by a completed run.
    pub final_phase: ScenarioPhase,
    /// The highest number of virtual users that were live at the same time.
    pub peak_vus: u64,
    /// The total number of virtual users started over the scenario's lifetime.
    pub vus_spawned: u64,
    /// Whether the scenario was cut short by an external stop.
    pub interrupted: bool,
}

/// An immutable snapshot of every metric recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Wall time covered by the report, in seconds.
    pub duration_s: f64,
    /// Set when the run was stopped before every scenario finished its profile.
    pub interrupted: bool,
    pub scenarios: Vec<ScenarioOutcome>,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl Report {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Trend(trend)) => Some(trend),
            _ => None,
        }
    }

    pub fn counter(&self, name: &str) -> Option<&CounterSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Counter(counter)) => Some(counter),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<&RateSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Rate(rate)) => Some(rate),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<&GaugeSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Gauge(gauge)) => Some(gauge),
            _ => None,
        }
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioOutcome> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSummary {
    Trend(TrendSummary),
    Counter(CounterSummary),
    Rate(RateSummary),
    Gauge(GaugeSummary),
}

/// Summary of a latency metric. All times are in milliseconds.
///
/// `count`, `min_ms`, `max_ms` and `avg_ms` are exact. The values in `stats` for `med` and `p(N)`
/// come from a histogram and are within `max(1µs, 0.1%)` of the true value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    /// The requested stats, in the order they were requested.
    pub stats: Vec<StatValue>,
}

impl TrendSummary {
    pub fn stat(&self, stat: SummaryStat) -> Option<f64> {
        self.stats
            .iter()
            .find(|value| value.stat == stat)
            .map(|value| value.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatValue {
    pub stat: SummaryStat,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSummary {
    /// Number of times the counter was added to.
    pub count: u64,
    /// Sum of everything added.
    pub total: f64,
    /// `total` per second of the report's duration.
    pub rate_per_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    pub passes: u64,
    pub fails: u64,
    /// Fraction of observations that were true, in `[0, 1]`.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSummary {
    /// The most recently recorded value.
    pub value: f64,
    pub min: f64,
    pub max: f64,
}
