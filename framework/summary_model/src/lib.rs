mod report;
mod stat;

pub use report::{
    CounterSummary, GaugeSummary, MetricSummary, RateSummary, Report, ScenarioOutcome,
    ScenarioPhase, StatValue, TrendSummary,
};
pub use stat::{ParseSummaryStatError, SummaryStat};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// The configured load profile of one scenario, as recorded in a [RunSummary].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioProfile {
    pub name: String,
    /// Name of the probe the scenario runs.
    pub exec: String,
    pub start_vus: u64,
    /// `(duration_ms, target)` for each stage, in order.
    pub stages: Vec<(u64, u64)>,
    pub start_time_ms: u64,
    pub graceful_stop_ms: u64,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the run definition that was executed
    pub run_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The cap on the run duration, in seconds, if one was given on the command line
    ///
    /// Without a cap the run lasts as long as its longest scenario profile.
    pub run_duration: Option<u64>,
    /// The enabled scenarios and their load profiles
    pub scenarios: Vec<ScenarioProfile>,
    /// The peak number of live virtual users reached by each scenario
    pub peak_vus: HashMap<String, u64>,
    /// Whether the run was stopped before every scenario completed its profile
    pub interrupted: bool,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the runner is aware of or
    /// that are included by the scenario itself.
    pub env: HashMap<String, String>,
    /// The version of Gale that was used for this run
    pub gale_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        run_name: String,
        started_at: i64,
        run_duration: Option<u64>,
        scenarios: Vec<ScenarioProfile>,
        gale_version: String,
    ) -> Self {
        Self {
            run_id,
            run_name,
            started_at,
            run_duration,
            scenarios,
            peak_vus: HashMap::new(),
            interrupted: false,
            env: HashMap::with_capacity(0),
            gale_version,
        }
    }

    /// Copy the per-scenario results of a finished run into this summary
    pub fn record_outcome(&mut self, report: &Report) {
        self.interrupted = report.interrupted;
        for outcome in &report.scenarios {
            self.peak_vus.insert(outcome.name.clone(), outcome.peak_vus);
        }
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used for the run.
    /// It uses the
    ///     - Run name
    ///     - Run duration
    ///     - Scenario profiles
    ///     - Selected environment variables
    ///     - Gale version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.run_name.as_bytes());
        if let Some(run_duration) = self.run_duration {
            Digest::update(&mut hasher, run_duration.to_le_bytes());
        }
        self.scenarios
            .iter()
            .sorted_by_key(|s| s.name.clone())
            .for_each(|s| {
                Digest::update(&mut hasher, s.name.as_bytes());
                Digest::update(&mut hasher, s.exec.as_bytes());
                Digest::update(&mut hasher, s.start_vus.to_le_bytes());
                for (duration_ms, target) in &s.stages {
                    Digest::update(&mut hasher, duration_ms.to_le_bytes());
                    Digest::update(&mut hasher, target.to_le_bytes());
                }
                Digest::update(&mut hasher, s.start_time_ms.to_le_bytes());
                Digest::update(&mut hasher, s.graceful_stop_ms.to_le_bytes());
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.gale_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all("\n".as_bytes())?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, &run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        runs.push(load_run_summary(line.as_bytes())?);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn java_profile() -> ScenarioProfile {
        ScenarioProfile {
            name: "java_test".to_string(),
            exec: "javaRequest".to_string(),
            start_vus: 300,
            stages: vec![(30_000, 1000), (60_000, 2000), (10_000, 0)],
            start_time_ms: 0,
            graceful_stop_ms: 10_000,
        }
    }

    fn sample_summary(run_id: &str) -> RunSummary {
        RunSummary::new(
            run_id.to_string(),
            "cache_compare".to_string(),
            1_700_000_000,
            None,
            vec![java_profile()],
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn fingerprint_ignores_run_identity() {
        let first = sample_summary("a");
        let mut second = sample_summary("b");
        second.started_at += 100;

        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_profile() {
        let first = sample_summary("a");
        let mut second = sample_summary("a");
        second.scenarios[0].stages[1].1 = 2500;

        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn append_and_load_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.jsonl");

        append_run_summary(sample_summary("a"), path.clone()).unwrap();
        append_run_summary(sample_summary("b"), path.clone()).unwrap();

        let runs = load_summary_runs(path).unwrap();
        assert_eq!(2, runs.len());
        assert_eq!("a", runs[0].run_id);
        assert_eq!(sample_summary("b"), runs[1]);
    }

    #[test]
    fn record_outcome_copies_peaks() {
        let mut summary = sample_summary("a");
        let report = Report {
            duration_s: 1.0,
            interrupted: true,
            scenarios: vec![ScenarioOutcome {
                name: "java_test".to_string(),
                final_phase: ScenarioPhase::Done,
                peak_vus: 42,
                vus_spawned: 50,
                interrupted: true,
            }],
            metrics: Default::default(),
        };

        summary.record_outcome(&report);

        assert!(summary.interrupted);
        assert_eq!(Some(&42), summary.peak_vus.get("java_test"));
    }
}
