use crate::error::ConfigError;
use crate::probe::{Probe, ProbeRegistry};
use crate::ramp::{RampProfile, Stage};
use gale_summary_model::{ScenarioProfile, SummaryStat};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Default time the last stage's target is held before a scenario stops.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_HARD_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Run-wide options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Stats reported for every trend metric, in order.
    pub summary_trend_stats: Vec<SummaryStat>,
    /// Passed through to probes, which may skip reading response bodies.
    pub discard_response_bodies: bool,
    /// How often each scheduler reconciles its virtual users.
    pub tick: Duration,
    /// How long a virtual user that was asked to stop may take before it is aborted.
    pub hard_stop_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            summary_trend_stats: SummaryStat::defaults(),
            discard_response_bodies: false,
            tick: DEFAULT_TICK,
            hard_stop_timeout: DEFAULT_HARD_STOP_TIMEOUT,
        }
    }
}

/// A named traffic pattern: a probe to call and a ramp profile to call it with.
///
/// ```
/// use gale_runner::prelude::ScenarioDefinition;
/// use std::time::Duration;
///
/// let scenario = ScenarioDefinition::new("java_test", "javaRequest")
///     .with_start_vus(300)
///     .with_stage(Duration::from_secs(30), 1000)
///     .with_stage(Duration::from_secs(60), 2000)
///     .with_stage(Duration::from_secs(10), 0)
///     .with_graceful_stop(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDefinition {
    pub(crate) name: String,
    pub(crate) exec: String,
    pub(crate) start_vus: u64,
    pub(crate) stages: Vec<Stage>,
    pub(crate) start_time: Duration,
    pub(crate) graceful_stop: Duration,
    pub(crate) enabled: bool,
}

impl ScenarioDefinition {
    /// A scenario that runs the probe registered as `exec`.
    pub fn new(name: impl Into<String>, exec: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exec: exec.into(),
            start_vus: 0,
            stages: Vec::new(),
            start_time: Duration::ZERO,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            enabled: true,
        }
    }

    pub fn with_start_vus(mut self, start_vus: u64) -> Self {
        self.start_vus = start_vus;
        self
    }

    /// Add a stage after any existing ones.
    pub fn with_stage(mut self, duration: Duration, target: u64) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Delay the scenario's start, measured from the start of the run.
    pub fn with_start_time(mut self, start_time: Duration) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// Disabled scenarios are checked along with the rest of the run but never started.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exec(&self) -> &str {
        &self.exec
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn profile(&self) -> RampProfile {
        RampProfile::new(self.start_vus, self.stages.clone(), self.graceful_stop)
    }

    /// Time from the start of the run until this scenario is expected to finish.
    pub fn planned_end(&self) -> Option<Duration> {
        self.profile()
            .total_duration()
            .map(|total| self.start_time + total)
    }

    pub(crate) fn summary_profile(&self) -> ScenarioProfile {
        ScenarioProfile {
            name: self.name.clone(),
            exec: self.exec.clone(),
            start_vus: self.start_vus,
            stages: self
                .stages
                .iter()
                .map(|stage| (stage.duration.as_millis() as u64, stage.target))
                .collect(),
            start_time_ms: self.start_time.as_millis() as u64,
            graceful_stop_ms: self.graceful_stop.as_millis() as u64,
        }
    }
}

/// Everything needed to execute a run.
#[derive(Debug, Clone)]
pub struct RunDefinition {
    pub(crate) name: String,
    pub(crate) scenarios: Vec<ScenarioDefinition>,
    pub(crate) probes: ProbeRegistry,
    pub(crate) options: RunOptions,
    pub(crate) env: BTreeMap<String, String>,
}

impl RunDefinition {
    /// Start a run definition. The name identifies the run in summaries.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenarios: Vec::new(),
            probes: ProbeRegistry::new(),
            options: RunOptions::default(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_scenario(mut self, scenario: ScenarioDefinition) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Register a probe that scenarios can reference by `exec`.
    pub fn with_probe(mut self, exec: impl Into<String>, probe: impl Probe) -> Self {
        self.probes.register(exec, probe);
        self
    }

    pub fn with_probes(mut self, probes: ProbeRegistry) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Record a setting that changes what the run measures, such as a target URL.
    ///
    /// These are copied into the run summary and are part of its fingerprint, so runs against
    /// different targets are told apart.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn scenarios(&self) -> &[ScenarioDefinition] {
        &self.scenarios
    }

    pub fn enabled_scenarios(&self) -> impl Iterator<Item = &ScenarioDefinition> {
        self.scenarios.iter().filter(|scenario| scenario.enabled)
    }

    /// Time until the last enabled scenario is expected to finish.
    ///
    /// `None` when any enabled scenario has no stages and only stops when the run is stopped.
    pub fn planned_duration(&self) -> Option<Duration> {
        self.enabled_scenarios()
            .map(ScenarioDefinition::planned_end)
            .try_fold(Duration::ZERO, |longest, end| Some(longest.max(end?)))
    }

    /// Check that the run can be executed.
    ///
    /// Every scenario is checked, including disabled ones, so that a mistake isn't hidden until
    /// the scenario is switched on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.options.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(ConfigError::EmptyScenarioName);
            }

            if !names.insert(scenario.name.as_str()) {
                return Err(ConfigError::DuplicateScenario(scenario.name.clone()));
            }

            if scenario.exec.trim().is_empty() {
                return Err(ConfigError::EmptyProbeRef {
                    scenario: scenario.name.clone(),
                });
            }

            if !self.probes.contains(&scenario.exec) {
                return Err(ConfigError::UnknownProbe {
                    scenario: scenario.name.clone(),
                    exec: scenario.exec.clone(),
                });
            }
        }

        if self.enabled_scenarios().next().is_none() {
            return Err(ConfigError::NoScenarios);
        }

        Ok(())
    }
}
