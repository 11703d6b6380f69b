use crate::cli::GaleCli;
use crate::definition::RunDefinition;
use crate::executor::ScenarioExecutor;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::shutdown::start_shutdown_listener;
use anyhow::Context;
use gale_summary_model::{append_run_summary, Report, RunSummary};
use std::time::Duration;

/// Execute a run and report on it.
///
/// Blocks until every scenario is done, the `--duration` cap is reached or the process receives
/// Ctrl-C. The report is handed to the configured reporters and returned.
pub fn run(definition: RunDefinition, cli: &GaleCli) -> anyhow::Result<Report> {
    log::info!("Running: {}", definition.name());

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;

    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| nanoid::nanoid!());
    let started_at = chrono::Utc::now().timestamp();
    let mut run_summary = RunSummary::new(
        run_id,
        definition.name().to_string(),
        started_at,
        cli.duration,
        definition
            .enabled_scenarios()
            .map(|scenario| scenario.summary_profile())
            .collect(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    for (key, value) in definition.env() {
        run_summary.add_env(key.clone(), value.clone());
    }

    let reporter = cli.report_config().init();
    let executor = ScenarioExecutor::new(definition, shutdown_handle.clone())?;

    let cap = cli.duration.map(Duration::from_secs);
    if let Some(cap) = cap {
        // Set a timer to shut down the run after the duration has elapsed
        let shutdown_handle = shutdown_handle.clone();
        runtime.spawn(async move {
            tokio::time::sleep(cap).await;
            log::info!("Run duration of {}s reached, stopping", cap.as_secs());
            shutdown_handle.shutdown();
        });
    }

    let planned = match (executor.planned_duration(), cap) {
        (Some(planned), Some(cap)) => Some(planned.min(cap)),
        (planned, cap) => planned.or(cap),
    };
    if let Some(planned) = planned.filter(|_| !cli.no_progress) {
        start_progress(
            planned,
            executor.statuses(),
            shutdown_handle.new_listener(),
        );
    }

    // Ready to start spawning virtual users so start the resource monitor to report high usage
    // which might lead to a misleading outcome.
    start_monitor(shutdown_handle.new_listener());

    let report = runtime.block_on(executor.run());

    // Stops the progress and monitor threads along with anything else still listening.
    shutdown_handle.shutdown();

    reporter.finalize(&report);

    if let Some(path) = &cli.run_summary {
        run_summary.record_outcome(&report);
        log::info!(
            "Appending run summary {} to {}",
            run_summary.fingerprint(),
            path.display()
        );
        append_run_summary(run_summary, path.clone())
            .with_context(|| format!("Failed to append run summary to {}", path.display()))?;
    }

    Ok(report)
}
