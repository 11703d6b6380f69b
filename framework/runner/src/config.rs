//! Run configuration files.
//!
//! Runs can be described in TOML using the option names load testers are used to:
//!
//! ```toml
//! [options]
//! summaryTrendStats = ["avg", "min", "med", "max", "p(90)", "p(95)", "p(99)"]
//! discardResponseBodies = false
//!
//! [scenarios.java_test]
//! startVUs = 300
//! stages = [
//!   { duration = "30s", target = 1000 },
//!   { duration = "60s", target = 2000 },
//!   { duration = "10s", target = 0 },
//! ]
//! gracefulStop = "10s"
//! exec = "javaRequest"
//! ```

use crate::definition::{RunDefinition, RunOptions, ScenarioDefinition, DEFAULT_GRACEFUL_STOP};
use crate::error::ConfigError;
use crate::probe::ProbeRegistry;
use crate::ramp::Stage;
use gale_summary_model::SummaryStat;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Name recorded in run summaries. Scenario binaries usually set their own.
    pub name: Option<String>,
    #[serde(default)]
    pub options: OptionsConfig,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionsConfig {
    pub summary_trend_stats: Option<Vec<String>>,
    #[serde(default)]
    pub discard_response_bodies: bool,
    pub tick: Option<String>,
    pub hard_stop_timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    pub start_time: Option<String>,
    pub graceful_stop: Option<String>,
    #[serde(default)]
    pub exec: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub duration: String,
    pub target: u64,
}

impl RunConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Resolve the configuration against the available probes.
    ///
    /// The returned definition is fully validated. Scenarios are ordered by name.
    pub fn into_definition(self, registry: &ProbeRegistry) -> Result<RunDefinition, ConfigError> {
        let options = self.options.into_options()?;

        let mut definition = RunDefinition::new(self.name.unwrap_or_else(|| "gale".to_string()))
            .with_probes(registry.clone())
            .with_options(options);

        for (name, scenario) in self.scenarios {
            let scenario = scenario.into_definition(name)?;
            definition = definition.with_scenario(scenario);
        }

        definition.validate()?;
        Ok(definition)
    }
}

impl OptionsConfig {
    fn into_options(self) -> Result<RunOptions, ConfigError> {
        let mut options = RunOptions {
            discard_response_bodies: self.discard_response_bodies,
            ..RunOptions::default()
        };

        if let Some(stats) = self.summary_trend_stats {
            options.summary_trend_stats = stats
                .iter()
                .map(|stat| stat.parse::<SummaryStat>())
                .collect::<Result<_, _>>()?;
        }
        if let Some(tick) = self.tick {
            options.tick = parse_duration_field("options.tick", &tick)?;
        }
        if let Some(timeout) = self.hard_stop_timeout {
            options.hard_stop_timeout =
                parse_duration_field("options.hardStopTimeout", &timeout)?;
        }

        Ok(options)
    }
}

impl ScenarioConfig {
    fn into_definition(self, name: String) -> Result<ScenarioDefinition, ConfigError> {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let field = format!("scenarios.{name}.stages[{i}].duration");
                Ok(Stage::new(
                    parse_duration_field(&field, &stage.duration)?,
                    stage.target,
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let start_time = match &self.start_time {
            Some(value) => parse_duration_field(&format!("scenarios.{name}.startTime"), value)?,
            None => Duration::ZERO,
        };
        let graceful_stop = match &self.graceful_stop {
            Some(value) => {
                parse_duration_field(&format!("scenarios.{name}.gracefulStop"), value)?
            }
            None => DEFAULT_GRACEFUL_STOP,
        };

        Ok(ScenarioDefinition::new(name, self.exec)
            .with_start_vus(self.start_vus)
            .with_stages(stages)
            .with_start_time(start_time)
            .with_graceful_stop(graceful_stop)
            .with_enabled(self.enabled))
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|reason| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    })
}

/// Parse a duration such as `30s`, `1m30s`, `500ms`, `1.5h` or `0`.
///
/// Supported units are `h`, `m`, `s`, `ms`, `us` (or `µs`) and `ns`. Units can be combined,
/// largest first or not, and a bare `0` is accepted.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("duration is empty".to_string());
    }
    if value == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number at `{rest}`"));
        }
        let (number, after_number) = rest.split_at(number_len);
        let number: f64 = number
            .parse()
            .map_err(|_| format!("`{number}` is not a number"))?;

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_len);
        let nanos_per_unit = match unit {
            "h" => 3_600_000_000_000.0,
            "m" => 60_000_000_000.0,
            "s" => 1_000_000_000.0,
            "ms" => 1_000_000.0,
            "us" | "µs" => 1_000.0,
            "ns" => 1.0,
            "" => return Err(format!("`{number}` is missing a unit")),
            other => return Err(format!("unknown unit `{other}`")),
        };

        total += Duration::from_nanos((number * nanos_per_unit).round() as u64);
        rest = after_unit;
    }

    Ok(total)
}
