use gale_summary_model::ParseSummaryStatError;
use std::path::PathBuf;

/// A run definition that cannot be executed.
///
/// These are all detected before any virtual user is started, so a run either starts with a
/// valid configuration or not at all.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no enabled scenarios are defined")]
    NoScenarios,
    #[error("scenario names must not be empty")]
    EmptyScenarioName,
    #[error("scenario `{0}` is defined more than once")]
    DuplicateScenario(String),
    #[error("scenario `{scenario}` does not name a probe in `exec`")]
    EmptyProbeRef { scenario: String },
    #[error("scenario `{scenario}` references unknown probe `{exec}`")]
    UnknownProbe { scenario: String, exec: String },
    #[error("invalid duration `{value}` for `{field}`: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },
    #[error("in `summaryTrendStats`: {0}")]
    InvalidSummaryStat(#[from] ParseSummaryStatError),
    #[error("the scheduler tick must be greater than zero")]
    ZeroTick,
    #[error("failed to parse run configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read run configuration `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
