use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::time::Instant;

/// The kind of a metric, fixed by the first value recorded under its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A distribution of durations, summarised with min/max/avg and percentiles.
    Trend,
    /// A cumulative sum, summarised with its total and per-second rate.
    Counter,
    /// A boolean outcome, summarised as the fraction of true values.
    Rate,
    /// A point-in-time value, summarised with its latest, min and max.
    Gauge,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricKind::Trend => "trend",
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
            MetricKind::Gauge => "gauge",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Trend(Duration),
    Counter(f64),
    Rate(bool),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Trend(_) => MetricKind::Trend,
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Rate(_) => MetricKind::Rate,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// One recorded data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: String,
    pub value: MetricValue,
    pub timestamp: Instant,
}

impl Observation {
    pub fn new(metric: impl Into<String>, value: MetricValue) -> Self {
        Self {
            metric: metric.into(),
            value,
            timestamp: Instant::now(),
        }
    }
}
