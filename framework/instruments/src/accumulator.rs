use crate::metrics::{MetricKind, MetricValue};
use gale_summary_model::{
    CounterSummary, GaugeSummary, MetricSummary, RateSummary, StatValue, SummaryStat,
    TrendSummary,
};
use hdrhistogram::Histogram;
use std::time::Duration;
use tokio::time::Instant;

/// Values are recorded in nanoseconds but only resolved down to a microsecond.
const LOWEST_DISCERNIBLE_NANOS: u64 = 1_000;
/// One hour. Anything slower saturates into the top bucket.
const HIGHEST_TRACKABLE_NANOS: u64 = 3_600_000_000_000;
/// Three significant figures keeps quantiles within 0.1% of the true value.
const SIGNIFICANT_FIGURES: u8 = 3;

/// Running state for one metric. Accumulators of the same kind merge associatively and
/// commutatively, so per-shard state can be combined in any order.
#[derive(Debug, Clone)]
pub(crate) enum Accumulator {
    Trend(TrendAccumulator),
    Counter(CounterAccumulator),
    Rate(RateAccumulator),
    Gauge(GaugeAccumulator),
}

impl Accumulator {
    pub(crate) fn new(value: MetricValue, at: Instant) -> Self {
        let mut accumulator = match value.kind() {
            MetricKind::Trend => Accumulator::Trend(TrendAccumulator::new()),
            MetricKind::Counter => Accumulator::Counter(CounterAccumulator::default()),
            MetricKind::Rate => Accumulator::Rate(RateAccumulator::default()),
            MetricKind::Gauge => Accumulator::Gauge(GaugeAccumulator::new(at)),
        };
        // The kinds match by construction.
        let _ = accumulator.consume(value, at);
        accumulator
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Accumulator::Trend(_) => MetricKind::Trend,
            Accumulator::Counter(_) => MetricKind::Counter,
            Accumulator::Rate(_) => MetricKind::Rate,
            Accumulator::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Number of observations folded into this accumulator.
    pub(crate) fn count(&self) -> u64 {
        match self {
            Accumulator::Trend(t) => t.count,
            Accumulator::Counter(c) => c.count,
            Accumulator::Rate(r) => r.passes + r.fails,
            Accumulator::Gauge(g) => g.count,
        }
    }

    /// Fold a value in. Returns the value back if it is of a different kind.
    pub(crate) fn consume(&mut self, value: MetricValue, at: Instant) -> Result<(), MetricValue> {
        match (self, value) {
            (Accumulator::Trend(t), MetricValue::Trend(d)) => t.consume(d),
            (Accumulator::Counter(c), MetricValue::Counter(v)) => {
                c.count += 1;
                c.total += v;
            }
            (Accumulator::Rate(r), MetricValue::Rate(passed)) => {
                if passed {
                    r.passes += 1;
                } else {
                    r.fails += 1;
                }
            }
            (Accumulator::Gauge(g), MetricValue::Gauge(v)) => g.consume(v, at),
            (_, value) => return Err(value),
        }
        Ok(())
    }

    /// Merge another accumulator in. Returns it back if it is of a different kind.
    pub(crate) fn merge(&mut self, other: &Accumulator) -> Result<(), MetricKind> {
        match (self, other) {
            (Accumulator::Trend(a), Accumulator::Trend(b)) => a.merge(b),
            (Accumulator::Counter(a), Accumulator::Counter(b)) => {
                a.count += b.count;
                a.total += b.total;
            }
            (Accumulator::Rate(a), Accumulator::Rate(b)) => {
                a.passes += b.passes;
                a.fails += b.fails;
            }
            (Accumulator::Gauge(a), Accumulator::Gauge(b)) => a.merge(b),
            (_, other) => return Err(other.kind()),
        }
        Ok(())
    }

    pub(crate) fn summarize(&self, stats: &[SummaryStat], elapsed: Duration) -> MetricSummary {
        match self {
            Accumulator::Trend(t) => MetricSummary::Trend(t.summarize(stats)),
            Accumulator::Counter(c) => {
                let secs = elapsed.as_secs_f64();
                MetricSummary::Counter(CounterSummary {
                    count: c.count,
                    total: c.total,
                    rate_per_s: if secs > 0.0 { c.total / secs } else { 0.0 },
                })
            }
            Accumulator::Rate(r) => {
                let total = r.passes + r.fails;
                MetricSummary::Rate(RateSummary {
                    passes: r.passes,
                    fails: r.fails,
                    rate: if total > 0 {
                        r.passes as f64 / total as f64
                    } else {
                        0.0
                    },
                })
            }
            Accumulator::Gauge(g) => MetricSummary::Gauge(GaugeSummary {
                value: g.value,
                min: g.min,
                max: g.max,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrendAccumulator {
    count: u64,
    sum_nanos: u128,
    min: Duration,
    max: Duration,
    histogram: Histogram<u64>,
}

impl TrendAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum_nanos: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            histogram: Histogram::new_with_bounds(
                LOWEST_DISCERNIBLE_NANOS,
                HIGHEST_TRACKABLE_NANOS,
                SIGNIFICANT_FIGURES,
            )
            .expect("Histogram bounds are valid constants"),
        }
    }

    fn consume(&mut self, value: Duration) {
        let nanos = value.as_nanos();
        self.count += 1;
        self.sum_nanos += nanos;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.histogram
            .saturating_record(u64::try_from(nanos).unwrap_or(u64::MAX));
    }

    fn merge(&mut self, other: &TrendAccumulator) {
        self.count += other.count;
        self.sum_nanos += other.sum_nanos;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        if let Err(e) = self.histogram.add(&other.histogram) {
            log::warn!("Failed to merge latency histograms: {e:?}");
        }
    }

    fn quantile_nanos(&self, quantile: f64) -> f64 {
        let value = self.histogram.value_at_quantile(quantile) as f64;
        // The histogram reports the top of a bucket; the exact extremes are tighter bounds.
        value.clamp(self.min.as_nanos() as f64, self.max.as_nanos() as f64)
    }

    fn summarize(&self, stats: &[SummaryStat]) -> TrendSummary {
        let avg_nanos = if self.count > 0 {
            self.sum_nanos as f64 / self.count as f64
        } else {
            0.0
        };
        let (min_ms, max_ms) = if self.count > 0 {
            (to_ms(self.min.as_nanos() as f64), to_ms(self.max.as_nanos() as f64))
        } else {
            (0.0, 0.0)
        };

        let stats = stats
            .iter()
            .map(|stat| {
                let value = match stat {
                    SummaryStat::Avg => to_ms(avg_nanos),
                    SummaryStat::Min => min_ms,
                    SummaryStat::Max => max_ms,
                    SummaryStat::Count => self.count as f64,
                    SummaryStat::Med => to_ms(self.quantile_nanos(0.5)),
                    SummaryStat::Percentile(p) => to_ms(self.quantile_nanos(p / 100.0)),
                };
                StatValue { stat: *stat, value }
            })
            .collect();

        TrendSummary {
            count: self.count,
            min_ms,
            max_ms,
            avg_ms: to_ms(avg_nanos),
            stats,
        }
    }
}

fn to_ms(nanos: f64) -> f64 {
    nanos / 1_000_000.0
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CounterAccumulator {
    count: u64,
    total: f64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RateAccumulator {
    passes: u64,
    fails: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct GaugeAccumulator {
    count: u64,
    value: f64,
    at: Instant,
    min: f64,
    max: f64,
}

impl GaugeAccumulator {
    fn new(at: Instant) -> Self {
        Self {
            count: 0,
            value: 0.0,
            at,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn consume(&mut self, value: f64, at: Instant) {
        self.count += 1;
        if at >= self.at {
            self.value = value;
            self.at = at;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &GaugeAccumulator) {
        self.count += other.count;
        if other.at > self.at {
            self.value = other.value;
            self.at = other.at;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}
