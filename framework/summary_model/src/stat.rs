use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A statistic to compute for trend metrics when a report is produced.
///
/// The textual forms are `avg`, `min`, `med`, `max`, `count` and `p(N)` where `N` is a
/// percentile in `(0, 100]`, for example `p(90)` or `p(99.9)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SummaryStat {
    Avg,
    Min,
    Med,
    Max,
    Count,
    Percentile(f64),
}

impl SummaryStat {
    /// The stats shown when nothing else is requested.
    pub fn defaults() -> Vec<SummaryStat> {
        vec![
            SummaryStat::Avg,
            SummaryStat::Min,
            SummaryStat::Med,
            SummaryStat::Max,
            SummaryStat::Percentile(90.0),
            SummaryStat::Percentile(95.0),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid summary stat `{0}`, expected one of avg, min, med, max, count or p(N) with 0 < N <= 100")]
pub struct ParseSummaryStatError(pub String);

impl FromStr for SummaryStat {
    type Err = ParseSummaryStatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "avg" => Ok(SummaryStat::Avg),
            "min" => Ok(SummaryStat::Min),
            "med" => Ok(SummaryStat::Med),
            "max" => Ok(SummaryStat::Max),
            "count" => Ok(SummaryStat::Count),
            _ => trimmed
                .strip_prefix("p(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|p| p.trim().parse::<f64>().ok())
                .filter(|p| *p > 0.0 && *p <= 100.0)
                .map(SummaryStat::Percentile)
                .ok_or_else(|| ParseSummaryStatError(s.to_string())),
        }
    }
}

impl TryFrom<String> for SummaryStat {
    type Error = ParseSummaryStatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SummaryStat> for String {
    fn from(value: SummaryStat) -> Self {
        value.to_string()
    }
}

impl Display for SummaryStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryStat::Avg => write!(f, "avg"),
            SummaryStat::Min => write!(f, "min"),
            SummaryStat::Med => write!(f, "med"),
            SummaryStat::Max => write!(f, "max"),
            SummaryStat::Count => write!(f, "count"),
            SummaryStat::Percentile(p) => write!(f, "p({p})"),
        }
    }
}
