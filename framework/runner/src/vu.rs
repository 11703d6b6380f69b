use crate::context::ProbeContext;
use crate::probe::{Probe, ProbeOutcome};
use futures::FutureExt;
use gale_core::prelude::ShutdownSignalError;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;

/// Metric names a virtual user records for every probe call.
#[derive(Debug, Clone)]
pub(crate) struct VuMetricNames {
    pub duration: String,
    pub reqs: String,
    pub failed: String,
}

impl VuMetricNames {
    pub(crate) fn for_prefix(prefix: &str) -> Self {
        Self {
            duration: format!("{prefix}_duration"),
            reqs: format!("{prefix}_reqs"),
            failed: format!("{prefix}_failed"),
        }
    }
}

/// A virtual user. Calls its probe in a loop until its shutdown listener fires.
pub(crate) struct VuWorker {
    probe: Arc<dyn Probe>,
    ctx: ProbeContext,
    names: Arc<VuMetricNames>,
}

impl VuWorker {
    pub(crate) fn new(probe: Arc<dyn Probe>, ctx: ProbeContext, names: Arc<VuMetricNames>) -> Self {
        Self { probe, ctx, names }
    }

    /// Run until told to stop. The stop signal is only checked between iterations so an
    /// iteration in progress always completes and is recorded.
    pub(crate) async fn run(mut self) {
        log::trace!(
            "Starting VU {} for scenario {}",
            self.ctx.vu_id(),
            self.ctx.scenario()
        );

        loop {
            if self.ctx.shutdown_listener().should_shutdown() {
                break;
            }

            self.ctx.next_iteration();
            if let Some(outcome) = self.iterate().await {
                let recorder = self.ctx.recorder();
                recorder.add_trend(&self.names.duration, outcome.elapsed);
                recorder.add_counter(&self.names.reqs, 1.0);
                recorder.add_rate(&self.names.failed, !outcome.success);
            }

            // Probes that complete without suspending must not starve the rest of the runtime.
            tokio::task::yield_now().await;
        }

        log::trace!(
            "Stopped VU {} for scenario {} after {} iterations",
            self.ctx.vu_id(),
            self.ctx.scenario(),
            self.ctx.iteration()
        );
    }

    /// Call the probe once, containing any error or panic.
    ///
    /// Returns `None` when the probe gave up because of a shutdown signal, in which case there
    /// is nothing meaningful to record.
    async fn iterate(&mut self) -> Option<ProbeOutcome> {
        let started = Instant::now();
        let result = AssertUnwindSafe(self.probe.call(&mut self.ctx))
            .catch_unwind()
            .await;
        let wall_clock = started.elapsed();

        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) if e.is::<ShutdownSignalError>() => None,
            Ok(Err(e)) => {
                log::debug!(
                    "Probe {} failed for VU {} in scenario {}: {e:?}",
                    self.probe.metric_prefix(),
                    self.ctx.vu_id(),
                    self.ctx.scenario()
                );
                Some(ProbeOutcome::failure(wall_clock))
            }
            Err(panic) => {
                log::warn!(
                    "Probe {} panicked for VU {} in scenario {}: {}",
                    self.probe.metric_prefix(),
                    self.ctx.vu_id(),
                    self.ctx.scenario(),
                    panic_message(panic.as_ref())
                );
                Some(ProbeOutcome::failure(wall_clock))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::probe_fn;
    use gale_core::prelude::ShutdownHandle;
    use gale_instruments::MetricSink;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn spawn_vu(
        probe: impl Probe,
        sink: &MetricSink,
        handle: &ShutdownHandle,
    ) -> tokio::task::JoinHandle<()> {
        let probe: Arc<dyn Probe> = Arc::new(probe);
        let names = Arc::new(VuMetricNames::for_prefix(probe.metric_prefix()));
        let ctx = ProbeContext::new(
            Arc::from("test"),
            0,
            sink.recorder(),
            handle.new_listener(),
            false,
        );
        tokio::spawn(VuWorker::new(probe, ctx, names).run())
    }

    #[tokio::test(start_paused = true)]
    async fn records_every_iteration_until_stopped() {
        let sink = MetricSink::with_shards(1);
        let handle = ShutdownHandle::new();

        let probe = probe_fn("ok", |_ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(ProbeOutcome::success(Duration::from_millis(10)))
            })
        });
        let vu = spawn_vu(probe, &sink, &handle);

        tokio::time::sleep(Duration::from_millis(105)).await;
        handle.shutdown();
        vu.await.unwrap();

        let report = sink.snapshot(&[]);
        // Iterations complete at 10ms, 20ms, ... 100ms, and the one in progress at 105ms
        // finishes before the stop is seen.
        assert_eq!(11, sink.count("ok_reqs"));
        assert_eq!(10.0, report.trend("ok_duration").unwrap().avg_ms);
        assert_eq!(0.0, report.rate("ok_failed").unwrap().rate);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_panics_are_recorded_as_failures() {
        let sink = MetricSink::with_shards(1);
        let handle = ShutdownHandle::new();

        let probe = probe_fn("flaky", |ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                match ctx.iteration() % 3 {
                    0 => panic!("probe exploded"),
                    1 => anyhow::bail!("connection refused"),
                    _ => Ok(ProbeOutcome::failure(Duration::from_millis(10))),
                }
            })
        });
        let vu = spawn_vu(probe, &sink, &handle);

        tokio::time::sleep(Duration::from_millis(95)).await;
        handle.shutdown();
        vu.await.unwrap();

        let report = sink.snapshot(&[]);
        let failed = report.rate("flaky_failed").unwrap();
        // `_failed` is true for every failed iteration.
        assert_eq!(10, failed.passes);
        assert_eq!(0, failed.fails);
        assert_eq!(10, report.trend("flaky_duration").unwrap().count);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancellation_is_not_recorded() {
        let sink = MetricSink::with_shards(1);
        let handle = ShutdownHandle::new();

        let probe = probe_fn("slow", |ctx| {
            Box::pin(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        Ok(ProbeOutcome::success(Duration::from_secs(60)))
                    }
                    _ = ctx.shutdown_listener().wait_for_shutdown() => {
                        Err(anyhow::Error::new(ShutdownSignalError::default()))
                    }
                }
            })
        });
        let vu = spawn_vu(probe, &sink, &handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.shutdown();
        vu.await.unwrap();

        assert_eq!(0, sink.count("slow_reqs"));
    }
}
