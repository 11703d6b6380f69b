use crate::scheduler::SchedulerStatus;
use gale_core::prelude::DelegatedShutdownListener;
use gale_summary_model::ScenarioPhase;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::fmt::Write;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Displays a progress bar while the run is in progress.
///
/// The bar fills up over `planned_runtime` and its message lists how many virtual users each
/// active scenario has against how many it wants.
pub(crate) fn start_progress(
    planned_runtime: Duration,
    scenarios: Vec<(String, watch::Receiver<SchedulerStatus>)>,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    let style = match progress_style(planned_runtime) {
        Ok(style) => style,
        Err(e) => {
            log::warn!("Not showing progress: {e}");
            return;
        }
    };

    let spawned = std::thread::Builder::new()
        .name("progress".to_string())
        .spawn(move || {
            let start_time = Instant::now();
            let pb = ProgressBar::new(planned_runtime.as_millis() as u64);
            pb.set_style(style);

            while !shutdown_listener.should_shutdown() {
                let elapsed = start_time.elapsed().min(planned_runtime);
                pb.set_position(elapsed.as_millis() as u64);

                let statuses = scenarios
                    .iter()
                    .map(|(name, status)| (name.as_str(), *status.borrow()))
                    .collect::<Vec<_>>();
                pb.set_message(vus_message(&statuses));

                std::thread::sleep(REFRESH_INTERVAL);
            }

            log::trace!("Progress thread shutting down");
            pb.finish_and_clear();
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start progress thread: {e}");
    }
}

fn progress_style(
    planned_runtime: Duration,
) -> Result<ProgressStyle, indicatif::style::TemplateError> {
    let planned = hms(planned_runtime);
    Ok(ProgressStyle::with_template(
        "{spinner:.green} [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_runtime}] {msg}",
    )?
    .with_key(
        "planned_runtime",
        move |_state: &ProgressState, w: &mut dyn Write| {
            let _ = w.write_str(&planned);
        },
    )
    .progress_chars("#>-"))
}

fn hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `java_test 1200/2000 VUs, go_test draining 3/0 VUs` for scenarios that have started and
/// are not yet done.
fn vus_message(statuses: &[(&str, SchedulerStatus)]) -> String {
    statuses
        .iter()
        .filter(|(_, status)| {
            !matches!(status.phase, ScenarioPhase::Pending | ScenarioPhase::Done)
        })
        .map(|(name, status)| {
            let draining = if status.phase == ScenarioPhase::Draining {
                " draining"
            } else {
                ""
            };
            format!(
                "{name}{draining} {}/{} VUs",
                status.live_vus, status.desired_vus
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
