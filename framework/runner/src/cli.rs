use clap::{Parser, ValueEnum};
use gale_instruments::{JsonTarget, ReportConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct GaleCli {
    /// Path to a TOML run configuration.
    ///
    /// Scenario binaries that bundle a configuration use it when this is not given.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Stop the run after this many seconds, even if scenarios have not finished their profiles.
    #[clap(long)]
    pub duration: Option<u64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// How to report the results of the run.
    #[clap(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Also write the report as JSON to this file.
    ///
    /// With `--reporter json` the file replaces stdout.
    #[clap(long)]
    pub json_output: Option<PathBuf>,

    /// Identifier for this run. A random one is generated if not given.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Append a summary of the run to this file, as a line of JSON.
    #[clap(long)]
    pub run_summary: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Print tables of the metrics to stdout.
    Summary,
    /// Print the report as JSON to stdout.
    Json,
    /// Don't report anything.
    Noop,
}

impl GaleCli {
    /// Defaults for running without any command line arguments.
    pub fn quiet() -> Self {
        Self {
            config: None,
            duration: None,
            no_progress: true,
            reporter: ReporterOpt::Noop,
            json_output: None,
            run_id: None,
            run_summary: None,
        }
    }

    pub fn report_config(&self) -> ReportConfig {
        let config = match self.reporter {
            ReporterOpt::Summary => ReportConfig::default().enable_summary(),
            ReporterOpt::Json => ReportConfig::default().enable_json(JsonTarget::Stdout),
            ReporterOpt::Noop => ReportConfig::default(),
        };

        match &self.json_output {
            Some(path) => config.enable_json_file(path.clone()),
            None => config,
        }
    }
}
