use crate::accumulator::Accumulator;
use crate::metrics::{MetricKind, MetricValue, Observation};
use gale_summary_model::{Report, SummaryStat};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type Shard = HashMap<String, Accumulator>;

/// Collects observations from every virtual user in a run.
///
/// The sink is split into shards, each behind its own lock, so that concurrent writers rarely
/// contend. Writers are spread across shards round-robin, either per call with
/// [MetricSink::record] or once per writer with [MetricSink::recorder]. Shards are merged when a
/// snapshot is taken.
///
/// A metric's kind is fixed sink-wide by the first value recorded under its name. Values of any
/// other kind are dropped, whichever shard they are written to.
///
/// Cloning the sink is cheap and every clone writes to the same state.
#[derive(Clone)]
pub struct MetricSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    shards: Box<[Mutex<Shard>]>,
    kinds: RwLock<HashMap<String, MetricKind>>,
    next_shard: AtomicUsize,
    started: Instant,
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("shards", &self.inner.shards.len())
            .finish()
    }
}

impl MetricSink {
    /// Create a sink with four shards per available core.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_shards(cores * 4)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Shard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            inner: Arc::new(SinkInner {
                shards,
                kinds: RwLock::new(HashMap::new()),
                next_shard: AtomicUsize::new(0),
                started: Instant::now(),
            }),
        }
    }

    /// Time since the sink was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Record one value against a metric.
    pub fn record(&self, metric: &str, value: MetricValue) {
        self.record_observation(Observation::new(metric, value));
    }

    pub fn record_observation(&self, observation: Observation) {
        self.write(self.next_shard(), observation);
    }

    /// A writer pinned to a single shard, intended to be owned by one virtual user.
    pub fn recorder(&self) -> MetricRecorder {
        MetricRecorder {
            sink: self.clone(),
            shard: self.next_shard(),
        }
    }

    /// The number of observations recorded against a metric so far.
    pub fn count(&self, metric: &str) -> u64 {
        let Some(kind) = self.inner.kinds.read().get(metric).copied() else {
            return 0;
        };

        self.inner
            .shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .get(metric)
                    .filter(|accumulator| accumulator.kind() == kind)
                    .map_or(0, Accumulator::count)
            })
            .sum()
    }

    /// Summarise everything recorded so far.
    ///
    /// The report's scenario outcomes are left empty and `interrupted` is false; the executor
    /// fills those in. Taking a snapshot while writers are still running is allowed and gives a
    /// consistent view of each shard, though not of the sink as a whole.
    pub fn snapshot(&self, stats: &[SummaryStat]) -> Report {
        let elapsed = self.elapsed();
        let mut merged: BTreeMap<String, Accumulator> = BTreeMap::new();

        for shard in self.inner.shards.iter() {
            let shard = shard.lock();
            for (name, accumulator) in shard.iter() {
                match merged.get_mut(name) {
                    Some(existing) => {
                        if let Err(kind) = existing.merge(accumulator) {
                            log::warn!(
                                "Metric `{name}` was recorded as both {} and {kind}, dropping the {kind} values",
                                existing.kind()
                            );
                        }
                    }
                    None => {
                        merged.insert(name.clone(), accumulator.clone());
                    }
                }
            }
        }

        Report {
            duration_s: elapsed.as_secs_f64(),
            interrupted: false,
            scenarios: Vec::new(),
            metrics: merged
                .into_iter()
                .map(|(name, accumulator)| {
                    let summary = accumulator.summarize(stats, elapsed);
                    (name, summary)
                })
                .collect(),
        }
    }

    fn next_shard(&self) -> usize {
        self.inner.next_shard.fetch_add(1, Ordering::Relaxed) % self.inner.shards.len()
    }

    fn write(&self, shard: usize, observation: Observation) {
        let Observation {
            metric,
            value,
            timestamp,
        } = observation;

        let mut shard = self.inner.shards[shard].lock();
        match shard.get_mut(&metric) {
            Some(accumulator) => {
                if let Err(value) = accumulator.consume(value, timestamp) {
                    log::warn!(
                        "Metric `{metric}` is a {} but a {} value was recorded, dropping it",
                        accumulator.kind(),
                        value.kind()
                    );
                }
            }
            None => {
                let kind = self.resolve_kind(&metric, value.kind());
                if kind != value.kind() {
                    log::warn!(
                        "Metric `{metric}` is a {kind} but a {} value was recorded, dropping it",
                        value.kind()
                    );
                    return;
                }
                shard.insert(metric, Accumulator::new(value, timestamp));
            }
        }
    }

    /// The kind registered for `metric`, registering `kind` if this is the first value seen.
    fn resolve_kind(&self, metric: &str, kind: MetricKind) -> MetricKind {
        if let Some(registered) = self.inner.kinds.read().get(metric) {
            return *registered;
        }

        *self
            .inner
            .kinds
            .write()
            .entry(metric.to_string())
            .or_insert(kind)
    }
}

/// Writes observations to a single shard of a [MetricSink].
#[derive(Debug, Clone)]
pub struct MetricRecorder {
    sink: MetricSink,
    shard: usize,
}

impl MetricRecorder {
    pub fn record(&self, metric: &str, value: MetricValue) {
        self.sink
            .write(self.shard, Observation::new(metric, value));
    }

    pub fn add_trend(&self, metric: &str, value: Duration) {
        self.record(metric, MetricValue::Trend(value));
    }

    pub fn add_counter(&self, metric: &str, value: f64) {
        self.record(metric, MetricValue::Counter(value));
    }

    pub fn add_rate(&self, metric: &str, passed: bool) {
        self.record(metric, MetricValue::Rate(passed));
    }

    pub fn set_gauge(&self, metric: &str, value: f64) {
        self.record(metric, MetricValue::Gauge(value));
    }
}
