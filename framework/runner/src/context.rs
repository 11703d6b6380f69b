use gale_core::prelude::DelegatedShutdownListener;
use gale_instruments::MetricRecorder;
use std::sync::Arc;

/// Everything a probe can see about the virtual user that is calling it.
///
/// One context is owned by each virtual user and handed to its probe on every iteration.
#[derive(Debug)]
pub struct ProbeContext {
    scenario: Arc<str>,
    vu_id: u64,
    iteration: u64,
    recorder: MetricRecorder,
    shutdown_listener: DelegatedShutdownListener,
    discard_response_bodies: bool,
}

impl ProbeContext {
    pub(crate) fn new(
        scenario: Arc<str>,
        vu_id: u64,
        recorder: MetricRecorder,
        shutdown_listener: DelegatedShutdownListener,
        discard_response_bodies: bool,
    ) -> Self {
        Self {
            scenario,
            vu_id,
            iteration: 0,
            recorder,
            shutdown_listener,
            discard_response_bodies,
        }
    }

    /// The name of the scenario this virtual user belongs to.
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Identifies the virtual user within its scenario. Ids start at 0 and are never reused.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// The current iteration of this virtual user, starting from 1.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Record custom metrics alongside the ones the virtual user records for every call.
    pub fn recorder(&self) -> &MetricRecorder {
        &self.recorder
    }

    /// Signalled when this virtual user is asked to stop, either because the scenario is ramping
    /// down or because the run is shutting down.
    ///
    /// Probes don't need to check this, the virtual user checks it between iterations. Long
    /// running probes can race their work against it to stop sooner.
    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    /// Whether probes should skip reading response bodies.
    pub fn discard_response_bodies(&self) -> bool {
        self.discard_response_bodies
    }
}
