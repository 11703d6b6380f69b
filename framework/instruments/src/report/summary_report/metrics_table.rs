use gale_summary_model::{MetricSummary, Report, SummaryStat};
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// One row of the table of non-latency metrics.
#[derive(Tabled)]
pub struct MetricRow {
    #[tabled(rename = "metric")]
    pub name: String,
    #[tabled(rename = "type")]
    pub kind: String,
    pub value: String,
    pub detail: String,
}

/// Build the latency table: one row per trend metric, one column per requested stat.
///
/// Every trend in a report carries the same stats, so the columns are taken from the first.
pub fn trend_table(report: &Report) -> Option<Table> {
    let trends = report
        .metrics
        .iter()
        .filter_map(|(name, summary)| match summary {
            MetricSummary::Trend(trend) => Some((name, trend)),
            _ => None,
        })
        .collect::<Vec<_>>();

    let (_, first) = trends.first()?;
    let stats = first.stats.iter().map(|s| s.stat).collect::<Vec<_>>();

    let mut builder = Builder::default();
    let mut header = vec!["metric".to_string(), "count".to_string()];
    header.extend(stats.iter().map(|stat| stat.to_string()));
    builder.push_record(header);

    for (name, trend) in trends {
        let mut record = vec![name.clone(), trend.count.to_string()];
        record.extend(stats.iter().map(|stat| match stat {
            SummaryStat::Count => trend.count.to_string(),
            other => trend
                .stat(*other)
                .map(|ms| format!("{ms:.2}ms"))
                .unwrap_or_else(|| "-".to_string()),
        }));
        builder.push_record(record);
    }

    let mut table = builder.build();
    table.with(Style::modern());
    Some(table)
}

/// Build the table of counters, rates and gauges.
pub fn other_metrics_table(report: &Report) -> Option<Table> {
    let rows = report
        .metrics
        .iter()
        .filter_map(|(name, summary)| {
            let (kind, value, detail) = match summary {
                MetricSummary::Trend(_) => return None,
                MetricSummary::Counter(counter) => (
                    "counter",
                    float2(counter.total),
                    format!("{}/s", float2(counter.rate_per_s)),
                ),
                MetricSummary::Rate(rate) => (
                    "rate",
                    format!("{}%", float2(rate.rate * 100.0)),
                    format!("✓ {} ✗ {}", rate.passes, rate.fails),
                ),
                MetricSummary::Gauge(gauge) => (
                    "gauge",
                    float2(gauge.value),
                    format!("min={} max={}", float2(gauge.min), float2(gauge.max)),
                ),
            };

            Some(MetricRow {
                name: name.clone(),
                kind: kind.to_string(),
                value,
                detail,
            })
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return None;
    }

    let mut table = Table::new(rows);
    table.with(Style::modern());
    Some(table)
}

fn float2(n: f64) -> String {
    format!("{n:.2}")
}
