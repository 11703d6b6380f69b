mod json_report;
mod noop_report;
mod summary_report;

use gale_summary_model::Report;
use std::path::PathBuf;

pub use json_report::{JsonReporter, JsonTarget};
pub use noop_report::NoopReporter;
pub use summary_report::SummaryTableReporter;

/// Receives the final report of a run and presents or exports it.
pub trait ReportCollector: Send + Sync {
    fn finalize(&self, report: &Report) -> anyhow::Result<()>;
}

/// Chooses which collectors receive the report at the end of a run.
///
/// With nothing enabled the resulting [Reporter] discards the report.
#[derive(Debug, Default, Clone)]
pub struct ReportConfig {
    enable_summary: bool,
    json_target: Option<JsonTarget>,
}

impl ReportConfig {
    /// Print summary tables to stdout when the run finishes.
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    /// Write the report as pretty JSON.
    pub fn enable_json(mut self, target: JsonTarget) -> Self {
        self.json_target = Some(target);
        self
    }

    /// Shorthand for [ReportConfig::enable_json] with a file target.
    pub fn enable_json_file(self, path: PathBuf) -> Self {
        self.enable_json(JsonTarget::File(path))
    }

    pub fn init(self) -> Reporter {
        let mut inner: Vec<Box<dyn ReportCollector>> = Vec::new();

        if self.enable_summary {
            inner.push(Box::new(SummaryTableReporter::new()));
        }

        if let Some(target) = self.json_target {
            inner.push(Box::new(JsonReporter::new(target)));
        }

        if inner.is_empty() {
            inner.push(Box::new(NoopReporter));
        }

        Reporter { inner }
    }
}

/// Fans the final report out to every configured collector.
pub struct Reporter {
    inner: Vec<Box<dyn ReportCollector>>,
}

impl Reporter {
    /// Hand the report to each collector in turn.
    ///
    /// A failing collector is logged and does not prevent the others from running.
    pub fn finalize(&self, report: &Report) {
        log::info!("Finalizing report with {} metrics", report.metrics.len());
        for collector in &self.inner {
            if let Err(e) = collector.finalize(report) {
                log::error!("Failed to finalize report: {e:?}");
            }
        }
    }

    pub fn collector_count(&self) -> usize {
        self.inner.len()
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("collectors", &self.inner.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetricSink, MetricValue};
    use gale_summary_model::SummaryStat;
    use std::time::Duration;

    #[test]
    fn empty_config_falls_back_to_noop() {
        let reporter = ReportConfig::default().init();
        assert_eq!(1, reporter.collector_count());
    }

    #[test]
    fn json_collector_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let sink = MetricSink::with_shards(1);
        sink.record("go_duration", MetricValue::Trend(Duration::from_millis(5)));
        sink.record("go_reqs", MetricValue::Counter(1.0));
        let report = sink.snapshot(&SummaryStat::defaults());

        let reporter = ReportConfig::default()
            .enable_summary()
            .enable_json_file(path.clone())
            .init();
        assert_eq!(2, reporter.collector_count());
        reporter.finalize(&report);

        let written: Report =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(report.trend("go_duration"), written.trend("go_duration"));
        assert_eq!(Some(1.0), written.counter("go_reqs").map(|c| c.total));
    }
}
