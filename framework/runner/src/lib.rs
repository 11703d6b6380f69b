mod cli;
mod config;
mod context;
mod definition;
mod error;
mod executor;
mod init;
mod monitor;
mod probe;
mod progress;
mod ramp;
mod run;
mod scheduler;
mod shutdown;
mod types;
mod vu;

pub use async_trait::async_trait;

pub mod prelude {
    pub use crate::cli::{GaleCli, ReporterOpt};
    pub use crate::config::{parse_duration, RunConfig};
    pub use crate::context::ProbeContext;
    pub use crate::definition::{
        RunDefinition, RunOptions, ScenarioDefinition, DEFAULT_GRACEFUL_STOP,
        DEFAULT_HARD_STOP_TIMEOUT, DEFAULT_TICK,
    };
    pub use crate::error::ConfigError;
    pub use crate::executor::ScenarioExecutor;
    pub use crate::init::init;
    pub use crate::probe::{probe_fn, FnProbe, Probe, ProbeOutcome, ProbeRegistry};
    pub use crate::ramp::{RampProfile, Stage};
    pub use crate::run::run;
    pub use crate::scheduler::{RampScheduler, SchedulerSettings, SchedulerStatus};
    pub use crate::types::GaleResult;
    pub use async_trait::async_trait;
    pub use gale_core::prelude::{ShutdownHandle, ShutdownSignalError};
    pub use gale_instruments::{MetricRecorder, MetricSink, MetricValue};
    pub use gale_summary_model::{Report, ScenarioPhase, SummaryStat};
}
