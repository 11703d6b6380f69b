use gale_core::prelude::DelegatedShutdownListener;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Share of the machine's total CPU above which the load generator warns about itself.
const HIGH_CPU_USAGE_PERCENT: f32 = 10.0;

/// Monitor the resource usage of the Gale process and report high usage.
///
/// Note that this won't stop the run proceeding, it will just log a warning to let the user know
/// that latencies measured by the run might be inflated by the load generator itself.
///
/// The CPU usage for the process is collected every [sysinfo::MINIMUM_CPU_UPDATE_INTERVAL] and checked.
pub(crate) fn start_monitor(mut shutdown_listener: DelegatedShutdownListener) {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let this_process_pid = Pid::from_u32(std::process::id());
            let mut sys = System::new();

            sys.refresh_cpu_all();
            let cpu_count = sys.cpus().len().max(1);

            loop {
                if shutdown_listener.should_shutdown() {
                    log::trace!("Monitor thread shutting down");
                    break;
                }

                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[this_process_pid]),
                    true,
                    ProcessRefreshKind::nothing().with_cpu(),
                );

                match sys.process(this_process_pid) {
                    Some(process) => {
                        let usage = cpu_share(process.cpu_usage(), cpu_count);
                        if usage > HIGH_CPU_USAGE_PERCENT {
                            log::warn!("High CPU usage detected. Gale is using {usage:.2}% of the CPU, with {cpu_count} available cores");
                        }
                    }
                    None => {
                        log::debug!("Could not read CPU usage for process {this_process_pid}");
                    }
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            }
        })
        .expect("Failed to start monitor thread");
}

/// Convert per-core process usage, where 100% is one full core, into a share of the whole machine.
fn cpu_share(process_usage: f32, cpu_count: usize) -> f32 {
    process_usage / cpu_count as f32
}
