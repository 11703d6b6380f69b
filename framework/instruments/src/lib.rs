mod accumulator;
mod metrics;
mod report;
mod sink;

pub use metrics::{MetricKind, MetricValue, Observation};
pub use report::{
    JsonReporter, JsonTarget, NoopReporter, ReportCollector, ReportConfig, Reporter,
    SummaryTableReporter,
};
pub use sink::{MetricRecorder, MetricSink};

pub mod prelude {
    pub use crate::{MetricKind, MetricRecorder, MetricSink, MetricValue, ReportConfig};
}
