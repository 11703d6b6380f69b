use crate::definition::{RunDefinition, ScenarioDefinition};
use crate::error::ConfigError;
use crate::probe::Probe;
use crate::scheduler::{RampScheduler, SchedulerSettings, SchedulerStatus};
use gale_core::prelude::ShutdownHandle;
use gale_instruments::MetricSink;
use gale_summary_model::{Report, ScenarioOutcome, ScenarioPhase, SummaryStat};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

struct PreparedScenario {
    definition: ScenarioDefinition,
    probe: Arc<dyn Probe>,
    status: watch::Sender<SchedulerStatus>,
}

/// Runs every enabled scenario of a [RunDefinition] and produces the final [Report].
///
/// The definition is validated when the executor is created, so a run with a configuration
/// error never starts any virtual users.
pub struct ScenarioExecutor {
    name: String,
    scenarios: Vec<PreparedScenario>,
    settings: SchedulerSettings,
    summary_trend_stats: Vec<SummaryStat>,
    sink: MetricSink,
    shutdown: ShutdownHandle,
}

impl ScenarioExecutor {
    /// Prepare a run. Shutting down `shutdown` stops the run early with a partial report.
    pub fn new(definition: RunDefinition, shutdown: ShutdownHandle) -> Result<Self, ConfigError> {
        definition.validate()?;

        let RunDefinition {
            name,
            scenarios,
            probes,
            options,
            ..
        } = definition;

        let scenarios = scenarios
            .into_iter()
            .filter(|scenario| scenario.enabled)
            .map(|scenario| -> Result<PreparedScenario, ConfigError> {
                let probe = probes
                    .get(&scenario.exec)
                    .ok_or_else(|| ConfigError::UnknownProbe {
                        scenario: scenario.name.clone(),
                        exec: scenario.exec.clone(),
                    })?;
                Ok(PreparedScenario {
                    definition: scenario,
                    probe,
                    status: watch::channel(SchedulerStatus::pending()).0,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            scenarios,
            settings: SchedulerSettings {
                tick: options.tick,
                hard_stop_timeout: options.hard_stop_timeout,
                discard_response_bodies: options.discard_response_bodies,
            },
            summary_trend_stats: options.summary_trend_stats,
            sink: MetricSink::new(),
            shutdown,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sink every virtual user records to. Useful for live progress.
    pub fn sink(&self) -> &MetricSink {
        &self.sink
    }

    /// Watch the status of a scenario. The status stays [ScenarioPhase::Pending] until the
    /// scenario's start time.
    pub fn status(&self, scenario: &str) -> Option<watch::Receiver<SchedulerStatus>> {
        self.scenarios
            .iter()
            .find(|prepared| prepared.definition.name == scenario)
            .map(|prepared| prepared.status.subscribe())
    }

    /// Watch the status of every enabled scenario, in definition order.
    pub fn statuses(&self) -> Vec<(String, watch::Receiver<SchedulerStatus>)> {
        self.scenarios
            .iter()
            .map(|prepared| {
                (
                    prepared.definition.name.clone(),
                    prepared.status.subscribe(),
                )
            })
            .collect()
    }

    /// Time until the last scenario is expected to finish, if every scenario has an end.
    pub fn planned_duration(&self) -> Option<Duration> {
        self.scenarios
            .iter()
            .map(|prepared| prepared.definition.planned_end())
            .try_fold(Duration::ZERO, |longest, end| Some(longest.max(end?)))
    }

    /// Run every scenario to completion and report on the run.
    ///
    /// Returns once every scenario is done and all of its virtual users have stopped. If the
    /// shutdown handle fires first, scenarios that have not started are skipped, running ones
    /// are stopped, and the report is marked as interrupted.
    pub async fn run(self) -> Report {
        log::info!(
            "Running {} with {} scenarios",
            self.name,
            self.scenarios.len()
        );

        let started = Instant::now();
        let handles = self
            .scenarios
            .into_iter()
            .map(|prepared| {
                let name = prepared.definition.name.clone();
                let handle = tokio::spawn(run_scenario(
                    prepared,
                    started,
                    self.sink.clone(),
                    self.shutdown.child(),
                    self.settings,
                ));
                (name, handle)
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::error!("Scenario {name} failed: {e}");
                    outcomes.push(ScenarioOutcome {
                        name,
                        final_phase: ScenarioPhase::Done,
                        peak_vus: 0,
                        vus_spawned: 0,
                        interrupted: true,
                    });
                }
            }
        }

        let mut report = self.sink.snapshot(&self.summary_trend_stats);
        report.interrupted = outcomes.iter().any(|outcome| outcome.interrupted);
        report.scenarios = outcomes;

        log::info!(
            "Run {} finished in {:.1}s{}",
            self.name,
            report.duration_s,
            if report.interrupted {
                ", interrupted"
            } else {
                ""
            }
        );

        report
    }
}

/// Wait for the scenario's start time, then schedule it.
async fn run_scenario(
    prepared: PreparedScenario,
    run_started: Instant,
    sink: MetricSink,
    shutdown: ShutdownHandle,
    settings: SchedulerSettings,
) -> ScenarioOutcome {
    let PreparedScenario {
        definition,
        probe,
        status,
    } = prepared;

    let start_at = run_started + definition.start_time;
    if start_at > Instant::now() {
        log::debug!(
            "Scenario {} pending for {:?}",
            definition.name,
            definition.start_time
        );

        let mut listener = shutdown.new_listener();
        tokio::select! {
            _ = tokio::time::sleep_until(start_at) => {}
            _ = listener.wait_for_shutdown() => {
                log::info!("Scenario {} cancelled before it started", definition.name);
                status.send_replace(SchedulerStatus {
                    phase: ScenarioPhase::Done,
                    ..SchedulerStatus::pending()
                });
                return ScenarioOutcome {
                    name: definition.name,
                    final_phase: ScenarioPhase::Done,
                    peak_vus: 0,
                    vus_spawned: 0,
                    interrupted: true,
                };
            }
        }
    }

    RampScheduler::with_status(
        &definition.name,
        definition.profile(),
        probe,
        sink,
        shutdown,
        settings,
        status,
    )
    .run()
    .await
}

impl std::fmt::Debug for ScenarioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioExecutor")
            .field("name", &self.name)
            .field(
                "scenarios",
                &self
                    .scenarios
                    .iter()
                    .map(|prepared| prepared.definition.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::RunOptions;
    use crate::probe::testing::SleepProbe;
    use crate::probe::{probe_fn, ProbeOutcome};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn base_definition() -> RunDefinition {
        RunDefinition::new("test")
            .with_probe("fastRequest", SleepProbe::new("fast", millis(10)))
            .with_probe("otherRequest", SleepProbe::new("other", millis(10)))
            .with_options(RunOptions {
                summary_trend_stats: vec![
                    gale_summary_model::SummaryStat::Med,
                    gale_summary_model::SummaryStat::Percentile(95.0),
                ],
                ..RunOptions::default()
            })
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_waits_for_start_time() {
        let definition = base_definition().with_scenario(
            ScenarioDefinition::new("late", "fastRequest")
                .with_start_vus(1)
                .with_stage(Duration::from_secs(5), 1)
                .with_start_time(Duration::from_secs(40))
                .with_graceful_stop(Duration::ZERO),
        );
        let executor = ScenarioExecutor::new(definition, ShutdownHandle::new()).unwrap();
        let sink = executor.sink().clone();
        let status = executor.status("late").unwrap();

        let start = Instant::now();
        let run = tokio::spawn(executor.run());

        tokio::time::sleep_until(start + millis(39_900)).await;
        assert_eq!(0, sink.count("fast_reqs"));
        assert_eq!(ScenarioPhase::Pending, status.borrow().phase);

        tokio::time::sleep_until(start + millis(40_500)).await;
        assert!(sink.count("fast_reqs") > 0);

        let report = run.await.unwrap();
        assert!(!report.interrupted);
        assert_eq!(
            ScenarioPhase::Done,
            report.scenario("late").unwrap().final_phase
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_count_follows_area_under_profile() {
        let definition = base_definition().with_scenario(
            ScenarioDefinition::new("ramp", "fastRequest")
                .with_stage(Duration::from_secs(1), 10)
                .with_stage(Duration::from_secs(2), 10)
                .with_stage(Duration::from_secs(1), 0)
                .with_graceful_stop(Duration::ZERO),
        );
        let executor = ScenarioExecutor::new(definition, ShutdownHandle::new()).unwrap();
        let sink = executor.sink().clone();

        let report = executor.run().await;

        // 30 VU-seconds of 10ms iterations, give or take the iterations in flight at each tick.
        let reqs = report.counter("fast_reqs").unwrap().total;
        assert!((2_850.0..=3_150.0).contains(&reqs), "reqs = {reqs}");

        let duration = report.trend("fast_duration").unwrap();
        assert_eq!(reqs as u64, duration.count);
        assert_eq!(Some(10.0), duration.stat(gale_summary_model::SummaryStat::Med));
        assert_eq!(0.0, report.rate("fast_failed").unwrap().rate);

        let scenario = report.scenario("ramp").unwrap();
        assert_eq!(10, scenario.peak_vus);
        assert!(!scenario.interrupted);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reqs as u64, sink.count("fast_reqs"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_partial_report() {
        let definition = base_definition()
            .with_scenario(
                ScenarioDefinition::new("running", "fastRequest")
                    .with_start_vus(5)
                    .with_stage(Duration::from_secs(60), 5),
            )
            .with_scenario(
                ScenarioDefinition::new("pending", "otherRequest")
                    .with_start_vus(5)
                    .with_stage(Duration::from_secs(60), 5)
                    .with_start_time(Duration::from_secs(30)),
            );
        let root = ShutdownHandle::new();
        let executor = ScenarioExecutor::new(definition, root.clone()).unwrap();

        let stopper = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            stopper.shutdown();
        });

        let start = Instant::now();
        let report = executor.run().await;

        assert!(start.elapsed() < Duration::from_millis(2_100));
        assert!(report.interrupted);
        assert!(report.counter("fast_reqs").unwrap().total > 0.0);
        assert!(report.counter("other_reqs").is_none());

        let pending = report.scenario("pending").unwrap();
        assert_eq!(ScenarioPhase::Done, pending.final_phase);
        assert_eq!(0, pending.vus_spawned);
        assert!(pending.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_follow_every_scenario() {
        let definition = base_definition()
            .with_scenario(
                ScenarioDefinition::new("first", "fastRequest")
                    .with_start_vus(3)
                    .with_stage(Duration::from_secs(2), 3)
                    .with_graceful_stop(Duration::ZERO),
            )
            .with_scenario(
                ScenarioDefinition::new("second", "otherRequest")
                    .with_start_vus(2)
                    .with_stage(Duration::from_secs(2), 2)
                    .with_start_time(Duration::from_secs(1))
                    .with_graceful_stop(Duration::ZERO),
            );
        let executor = ScenarioExecutor::new(definition, ShutdownHandle::new()).unwrap();
        let statuses = executor.statuses();
        assert_eq!(
            vec!["first", "second"],
            statuses
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
        );

        let start = Instant::now();
        let run = tokio::spawn(executor.run());

        tokio::time::sleep_until(start + millis(550)).await;
        let first = *statuses[0].1.borrow();
        assert_eq!((3, 3), (first.live_vus, first.desired_vus));
        assert_eq!(ScenarioPhase::Pending, statuses[1].1.borrow().phase);

        tokio::time::sleep_until(start + millis(1_550)).await;
        let second = *statuses[1].1.borrow();
        assert_eq!((2, 2), (second.live_vus, second.desired_vus));

        run.await.unwrap();
        assert!(statuses
            .iter()
            .all(|(_, status)| status.borrow().phase == ScenarioPhase::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_scenarios_record_everything() {
        let definition = base_definition()
            .with_scenario(
                ScenarioDefinition::new("first", "fastRequest")
                    .with_start_vus(3)
                    .with_stage(Duration::from_secs(1), 3)
                    .with_graceful_stop(Duration::ZERO),
            )
            .with_scenario(
                ScenarioDefinition::new("second", "otherRequest")
                    .with_start_vus(2)
                    .with_stage(Duration::from_secs(1), 2)
                    .with_start_time(millis(500))
                    .with_graceful_stop(Duration::ZERO),
            );
        let executor = ScenarioExecutor::new(definition, ShutdownHandle::new()).unwrap();

        let report = executor.run().await;

        let first = report.counter("fast_reqs").unwrap().total;
        let second = report.counter("other_reqs").unwrap().total;
        assert!((300.0..=303.0).contains(&first), "first = {first}");
        assert!((200.0..=202.0).contains(&second), "second = {second}");
        assert_eq!(first as u64, report.trend("fast_duration").unwrap().count);
        assert_eq!(second as u64, report.trend("other_duration").unwrap().count);
    }

    #[tokio::test(start_paused = true)]
    async fn disjoint_start_times_do_not_overlap() {
        let calls: Arc<Mutex<Vec<(&'static str, Instant)>>> = Arc::default();

        let recording_probe = |prefix: &'static str| {
            let calls = calls.clone();
            probe_fn(prefix, move |_ctx| {
                let calls = calls.clone();
                Box::pin(async move {
                    let started = Instant::now();
                    tokio::time::sleep(millis(10)).await;
                    calls.lock().unwrap().push((prefix, started));
                    Ok(ProbeOutcome::success(millis(10)))
                })
            })
        };

        let definition = RunDefinition::new("disjoint")
            .with_probe("a", recording_probe("a"))
            .with_probe("b", recording_probe("b"))
            .with_scenario(
                ScenarioDefinition::new("first", "a")
                    .with_start_vus(2)
                    .with_stage(Duration::from_secs(1), 2)
                    .with_graceful_stop(Duration::ZERO),
            )
            .with_scenario(
                ScenarioDefinition::new("second", "b")
                    .with_start_vus(2)
                    .with_stage(Duration::from_secs(1), 2)
                    .with_start_time(Duration::from_secs(2))
                    .with_graceful_stop(Duration::ZERO),
            );
        let executor = ScenarioExecutor::new(definition, ShutdownHandle::new()).unwrap();

        let start = Instant::now();
        executor.run().await;

        let calls = calls.lock().unwrap();
        let last_a = calls
            .iter()
            .filter(|(prefix, _)| *prefix == "a")
            .map(|(_, at)| *at)
            .max()
            .unwrap();
        let first_b = calls
            .iter()
            .filter(|(prefix, _)| *prefix == "b")
            .map(|(_, at)| *at)
            .min()
            .unwrap();

        assert!(last_a < start + Duration::from_millis(1_010));
        assert!(first_b >= start + Duration::from_secs(2));
    }

    #[test]
    fn configuration_errors_are_reported_before_running() {
        let definition = base_definition()
            .with_scenario(ScenarioDefinition::new("go_test", "goRequest").with_start_vus(1));

        let result = ScenarioExecutor::new(definition, ShutdownHandle::new());

        assert!(matches!(
            result,
            Err(ConfigError::UnknownProbe { scenario, .. }) if scenario == "go_test"
        ));
    }
}
