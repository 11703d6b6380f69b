mod metrics_table;

use crate::report::summary_report::metrics_table::{other_metrics_table, trend_table};
use crate::report::ReportCollector;
use gale_summary_model::Report;
use std::fmt::Write;

/// Prints the report as tables once the run is finished. Useful while developing scenarios and
/// for interactive runs.
#[derive(Debug, Default)]
pub struct SummaryTableReporter;

impl SummaryTableReporter {
    pub fn new() -> Self {
        Self
    }

    /// Render the report as it would be printed.
    pub fn render(&self, report: &Report) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "\nRun finished after {:.1}s{}",
            report.duration_s,
            if report.interrupted {
                " (interrupted)"
            } else {
                ""
            }
        );
        for scenario in &report.scenarios {
            let _ = writeln!(
                out,
                "  {}: peak {} VUs, {} started{}",
                scenario.name,
                scenario.peak_vus,
                scenario.vus_spawned,
                if scenario.interrupted {
                    ", interrupted"
                } else {
                    ""
                }
            );
        }

        if let Some(table) = trend_table(report) {
            let _ = writeln!(out, "\nSummary of latencies\n{table}");
        }

        if let Some(table) = other_metrics_table(report) {
            let _ = writeln!(out, "\nSummary of counters, rates and gauges\n{table}");
        }

        if report.metrics.is_empty() {
            let _ = writeln!(out, "\nNo metrics were recorded");
        }

        out
    }
}

impl ReportCollector for SummaryTableReporter {
    fn finalize(&self, report: &Report) -> anyhow::Result<()> {
        println!("{}", self.render(report));
        Ok(())
    }
}
