use crate::context::ProbeContext;
use crate::probe::Probe;
use crate::ramp::RampProfile;
use crate::vu::{VuMetricNames, VuWorker};
use gale_core::prelude::ShutdownHandle;
use gale_instruments::{MetricRecorder, MetricSink};
use gale_summary_model::{ScenarioOutcome, ScenarioPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// The state of a scenario's scheduler, published after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub phase: ScenarioPhase,
    pub desired_vus: u64,
    /// Virtual users that have not been asked to stop.
    pub live_vus: u64,
}

impl SchedulerStatus {
    pub fn pending() -> Self {
        Self {
            phase: ScenarioPhase::Pending,
            desired_vus: 0,
            live_vus: 0,
        }
    }
}

/// Settings a scheduler takes from the run options.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub hard_stop_timeout: Duration,
    pub discard_response_bodies: bool,
}

struct VuHandle {
    id: u64,
    shutdown: ShutdownHandle,
    join: JoinHandle<()>,
    stop_requested_at: Option<Instant>,
}

impl VuHandle {
    fn request_stop(&mut self) {
        self.shutdown.shutdown();
        self.stop_requested_at = Some(Instant::now());
    }
}

/// Keeps the number of live virtual users for one scenario in line with its [RampProfile].
///
/// On every tick the scheduler compares the number of live virtual users with the desired
/// number. Missing users are started straight away. Surplus users are asked to stop after their
/// current iteration, most recently started first. A user that has not stopped within the hard
/// stop timeout is aborted.
pub struct RampScheduler {
    scenario: Arc<str>,
    profile: RampProfile,
    probe: Arc<dyn Probe>,
    names: Arc<VuMetricNames>,
    sink: MetricSink,
    recorder: MetricRecorder,
    shutdown: ShutdownHandle,
    settings: SchedulerSettings,
    status: watch::Sender<SchedulerStatus>,
    vus_gauge: String,

    live: Vec<VuHandle>,
    stopping: Vec<VuHandle>,
    next_vu_id: u64,
    peak_vus: u64,
}

impl RampScheduler {
    /// Create a scheduler. The `shutdown` handle should be dedicated to this scheduler, usually
    /// a child of the executor's handle, since each virtual user is given a child of it.
    pub fn new(
        scenario: &str,
        profile: RampProfile,
        probe: Arc<dyn Probe>,
        sink: MetricSink,
        shutdown: ShutdownHandle,
        settings: SchedulerSettings,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::pending());
        Self::with_status(scenario, profile, probe, sink, shutdown, settings, status)
    }

    /// Create a scheduler that publishes its status on an existing channel.
    pub fn with_status(
        scenario: &str,
        profile: RampProfile,
        probe: Arc<dyn Probe>,
        sink: MetricSink,
        shutdown: ShutdownHandle,
        settings: SchedulerSettings,
        status: watch::Sender<SchedulerStatus>,
    ) -> Self {
        let names = Arc::new(VuMetricNames::for_prefix(probe.metric_prefix()));
        Self {
            scenario: Arc::from(scenario),
            profile,
            probe,
            names,
            recorder: sink.recorder(),
            sink,
            shutdown,
            settings,
            status,
            vus_gauge: format!("{scenario}::vus"),
            live: Vec::new(),
            stopping: Vec::new(),
            next_vu_id: 0,
            peak_vus: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Follow the profile until it ends or the scheduler is shut down, then stop every virtual
    /// user and wait for them.
    pub async fn run(mut self) -> ScenarioOutcome {
        log::info!("Starting scenario {}", self.scenario);

        let started = Instant::now();
        let mut shutdown_listener = self.shutdown.new_listener();
        let mut interval = tokio::time::interval(self.settings.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut phase = ScenarioPhase::Pending;
        let interrupted = loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_listener.wait_for_shutdown() => {}
            }

            if shutdown_listener.should_shutdown() {
                log::debug!("Scenario {} cancelled", self.scenario);
                break true;
            }

            let elapsed = started.elapsed();
            if self.profile.is_finished(elapsed) {
                break false;
            }

            let next_phase = self.profile.phase_at(elapsed);
            if next_phase != phase {
                log::debug!(
                    "Scenario {} moved from {phase:?} to {next_phase:?}",
                    self.scenario
                );
                phase = next_phase;
            }

            let desired = self.profile.desired_at(elapsed);
            self.reconcile(desired);
            self.reap_stopping();
            self.publish(phase, desired);
        };

        for mut vu in self.live.drain(..) {
            vu.request_stop();
            self.stopping.push(vu);
        }
        self.publish(ScenarioPhase::Draining, 0);
        self.drain().await;

        self.publish(ScenarioPhase::Done, 0);
        log::info!(
            "Scenario {} finished with a peak of {} VUs",
            self.scenario,
            self.peak_vus
        );

        ScenarioOutcome {
            name: self.scenario.to_string(),
            final_phase: ScenarioPhase::Done,
            peak_vus: self.peak_vus,
            vus_spawned: self.next_vu_id,
            interrupted,
        }
    }

    fn reconcile(&mut self, desired: u64) {
        let live = self.live.len() as u64;
        if desired > live {
            let count = desired - live;
            for _ in 0..count {
                self.spawn_vu();
            }
            log::debug!(
                "Scenario {} started {count} VUs, {desired} now live",
                self.scenario
            );
        } else if desired < live {
            let count = live - desired;
            for _ in 0..count {
                if let Some(mut vu) = self.live.pop() {
                    vu.request_stop();
                    self.stopping.push(vu);
                }
            }
            log::debug!(
                "Scenario {} stopping {count} VUs, {desired} remain live",
                self.scenario
            );
        }

        debug_assert_eq!(desired, self.live.len() as u64);
        self.peak_vus = self.peak_vus.max(self.live.len() as u64);
    }

    fn spawn_vu(&mut self) {
        let id = self.next_vu_id;
        self.next_vu_id += 1;

        let shutdown = self.shutdown.child();
        let ctx = ProbeContext::new(
            self.scenario.clone(),
            id,
            self.sink.recorder(),
            shutdown.new_listener(),
            self.settings.discard_response_bodies,
        );
        let worker = VuWorker::new(self.probe.clone(), ctx, self.names.clone());

        self.live.push(VuHandle {
            id,
            shutdown,
            join: tokio::spawn(worker.run()),
            stop_requested_at: None,
        });
    }

    /// Forget users that have stopped and abort any that are past the hard stop timeout.
    ///
    /// Aborted users are kept until their task has actually ended.
    fn reap_stopping(&mut self) {
        let timeout = self.settings.hard_stop_timeout;
        let scenario = &self.scenario;
        self.stopping.retain(|vu| {
            if vu.join.is_finished() {
                return false;
            }

            if vu
                .stop_requested_at
                .is_some_and(|at| at.elapsed() >= timeout)
            {
                log::warn!(
                    "VU {} in scenario {scenario} did not stop within {timeout:?}, aborting it",
                    vu.id
                );
                vu.join.abort();
            }
            true
        });
    }

    /// Wait for every stopping user, aborting those that overrun the hard stop timeout.
    async fn drain(&mut self) {
        let timeout = self.settings.hard_stop_timeout;
        for vu in self.stopping.drain(..) {
            let VuHandle {
                id,
                mut join,
                stop_requested_at,
                ..
            } = vu;
            let deadline = stop_requested_at.unwrap_or_else(Instant::now) + timeout;

            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    log::warn!("VU {id} in scenario {} ended abnormally: {e}", self.scenario)
                }
                Err(_) => {
                    log::warn!(
                        "VU {id} in scenario {} did not stop within {timeout:?}, aborting it",
                        self.scenario
                    );
                    join.abort();
                    // Resolves once the task has been dropped, so nothing records after this.
                    let _ = join.await;
                }
            }
        }
    }

    fn publish(&self, phase: ScenarioPhase, desired_vus: u64) {
        let live_vus = self.live.len() as u64;
        log::trace!(
            "Scenario {} tick: phase {phase:?}, desired {desired_vus}, live {live_vus}, stopping {}",
            self.scenario,
            self.stopping.len()
        );
        self.recorder.set_gauge(&self.vus_gauge, live_vus as f64);
        self.status.send_replace(SchedulerStatus {
            phase,
            desired_vus,
            live_vus,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::SleepProbe;
    use crate::ramp::Stage;
    use pretty_assertions::assert_eq;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_millis(100),
            hard_stop_timeout: Duration::from_secs(30),
            discard_response_bodies: false,
        }
    }

    fn scheduler(
        profile: RampProfile,
        probe: impl Probe,
        sink: &MetricSink,
        shutdown: &ShutdownHandle,
        settings: SchedulerSettings,
    ) -> RampScheduler {
        RampScheduler::new(
            "test",
            profile,
            Arc::new(probe),
            sink.clone(),
            shutdown.child(),
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn live_count_follows_profile_within_one_tick() {
        let profile = RampProfile::new(
            2,
            vec![
                Stage::new(Duration::from_secs(2), 10),
                Stage::new(Duration::ZERO, 25),
                Stage::new(Duration::from_secs(1), 25),
                Stage::new(Duration::from_secs(2), 0),
            ],
            Duration::from_secs(1),
        );
        let sink = MetricSink::with_shards(4);
        let root = ShutdownHandle::new();
        let scheduler = scheduler(
            profile.clone(),
            SleepProbe::new("probe", Duration::from_millis(10)),
            &sink,
            &root,
            settings(),
        );
        let status = scheduler.subscribe();

        let start = Instant::now();
        let run = tokio::spawn(scheduler.run());

        // Sample half way between ticks so the status reflects the tick just before.
        for tick in 0..60u64 {
            let tick_at = Duration::from_millis(tick * 100);
            tokio::time::sleep_until(start + tick_at + Duration::from_millis(50)).await;

            let current = *status.borrow();
            let desired = profile.desired_at(tick_at);
            assert_eq!(desired, current.desired_vus, "at {tick_at:?}");
            assert_eq!(desired, current.live_vus, "at {tick_at:?}");
        }

        let outcome = run.await.unwrap();
        assert_eq!(ScenarioPhase::Done, outcome.final_phase);
        assert_eq!(25, outcome.peak_vus);
        assert!(!outcome.interrupted);
        assert_eq!(ScenarioPhase::Done, status.borrow().phase);
        assert_eq!(Some(0.0), sink.snapshot(&[]).gauge("test::vus").map(|g| g.value));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_graceful_stop_and_stops_recording() {
        let profile = RampProfile::new(
            0,
            vec![
                Stage::new(Duration::from_secs(1), 4),
                Stage::new(Duration::from_secs(1), 4),
            ],
            Duration::from_secs(3),
        );
        let sink = MetricSink::with_shards(2);
        let root = ShutdownHandle::new();
        let scheduler = scheduler(
            profile,
            SleepProbe::new("probe", Duration::from_millis(10)),
            &sink,
            &root,
            settings(),
        );

        let start = Instant::now();
        let outcome = scheduler.run().await;
        let took = start.elapsed();

        assert!(took >= Duration::from_secs(5), "took {took:?}");
        assert!(took < Duration::from_millis(5_200), "took {took:?}");
        assert!(!outcome.interrupted);

        let count = sink.count("probe_reqs");
        assert!(count > 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count, sink.count("probe_reqs"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stages_run_until_cancelled() {
        let sink = MetricSink::with_shards(2);
        let root = ShutdownHandle::new();
        let scheduler = scheduler(
            RampProfile::new(3, vec![], Duration::from_secs(30)),
            SleepProbe::new("probe", Duration::from_millis(10)),
            &sink,
            &root,
            settings(),
        );
        let status = scheduler.subscribe();
        let run = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(3, status.borrow().live_vus);
        assert_eq!(ScenarioPhase::Steady, status.borrow().phase);

        let stopped_at = Instant::now();
        root.shutdown();
        let outcome = run.await.unwrap();

        assert!(outcome.interrupted);
        assert_eq!(3, outcome.peak_vus);
        assert_eq!(3, outcome.vus_spawned);
        // In-flight iterations finish, nothing waits for the hard stop timeout.
        assert!(stopped_at.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_vus_are_aborted_after_hard_stop_timeout() {
        let sink = MetricSink::with_shards(1);
        let root = ShutdownHandle::new();
        let scheduler = scheduler(
            RampProfile::new(2, vec![Stage::new(Duration::from_secs(1), 2)], Duration::ZERO),
            SleepProbe::new("stuck", Duration::from_secs(3600)),
            &sink,
            &root,
            SchedulerSettings {
                hard_stop_timeout: Duration::from_secs(5),
                ..settings()
            },
        );

        let start = Instant::now();
        let outcome = scheduler.run().await;
        let took = start.elapsed();

        assert!(took >= Duration::from_secs(6), "took {took:?}");
        assert!(took < Duration::from_millis(6_200), "took {took:?}");
        assert_eq!(2, outcome.vus_spawned);
        assert_eq!(0, sink.count("stuck_reqs"));
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_down_stops_most_recent_vus_first() {
        let sink = MetricSink::with_shards(1);
        let root = ShutdownHandle::new();
        let scheduler = scheduler(
            RampProfile::new(
                4,
                vec![
                    Stage::new(Duration::from_secs(1), 4),
                    Stage::new(Duration::ZERO, 1),
                    Stage::new(Duration::from_secs(1), 1),
                ],
                Duration::ZERO,
            ),
            crate::probe::probe_fn("vu", |ctx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ctx.recorder()
                        .add_counter(&format!("vu_{}_iterations", ctx.vu_id()), 1.0);
                    Ok(crate::probe::ProbeOutcome::success(Duration::from_millis(10)))
                })
            }),
            &sink,
            &root,
            settings(),
        );

        scheduler.run().await;

        let after_ramp_down = |vu: u64| sink.count(&format!("vu_{vu}_iterations"));
        // VU 0 keeps running for the second stage, the others stop after the first.
        assert!(after_ramp_down(0) > after_ramp_down(3) + 50);
        assert_eq!(after_ramp_down(1), after_ramp_down(3));
    }
}
