use gale_summary_model::ScenarioPhase;
use std::time::Duration;

/// One step of a ramp profile.
///
/// The number of virtual users moves linearly from the previous target to `target` over
/// `duration`. A zero duration is an instant jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// The desired number of virtual users over the lifetime of a scenario.
///
/// Time is measured from the scenario's start. The profile starts at `start_vus`, follows the
/// stages in order, then holds the last target for `graceful_stop` before dropping to zero.
/// Without stages it holds `start_vus` forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    start_vus: u64,
    stages: Vec<Stage>,
    graceful_stop: Duration,
}

impl RampProfile {
    pub fn new(start_vus: u64, stages: Vec<Stage>, graceful_stop: Duration) -> Self {
        Self {
            start_vus,
            stages,
            graceful_stop,
        }
    }

    /// Sum of all stage durations.
    pub fn stages_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// How long the profile runs for, including the graceful stop.
    ///
    /// `None` when there are no stages and the profile only ends with an external stop.
    pub fn total_duration(&self) -> Option<Duration> {
        if self.stages.is_empty() {
            None
        } else {
            Some(self.stages_duration() + self.graceful_stop)
        }
    }

    /// Whether the profile has ended and every virtual user should be stopped.
    pub fn is_finished(&self, elapsed: Duration) -> bool {
        self.total_duration()
            .is_some_and(|total| elapsed >= total)
    }

    /// The number of virtual users that should be live `elapsed` after the scenario started,
    /// rounded to the nearest whole user.
    pub fn desired_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() {
            return self.start_vus;
        }

        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return interpolate(from, stage.target, progress);
            }

            from = stage.target;
            stage_start = stage_end;
        }

        if elapsed < stage_start + self.graceful_stop {
            from
        } else {
            0
        }
    }

    /// The phase of the scenario `elapsed` after it started.
    ///
    /// Once the stages are over the profile reports [ScenarioPhase::Draining]. Only the scheduler
    /// knows when its virtual users have actually stopped, so this never reports
    /// [ScenarioPhase::Done].
    pub fn phase_at(&self, elapsed: Duration) -> ScenarioPhase {
        if self.stages.is_empty() {
            return ScenarioPhase::Steady;
        }

        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return if stage.target == from {
                    ScenarioPhase::Steady
                } else {
                    ScenarioPhase::Ramping
                };
            }

            from = stage.target;
            stage_start = stage_end;
        }

        ScenarioPhase::Draining
    }
}

fn interpolate(from: u64, to: u64, progress: f64) -> u64 {
    // Very long stages lose nanosecond precision in f64, so the ratio can round up to 1.
    let progress = progress.clamp(0.0, 1.0);
    let value = from as f64 + (to as f64 - from as f64) * progress;
    value.round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn java_profile() -> RampProfile {
        RampProfile::new(
            300,
            vec![
                Stage::new(secs(30), 1000),
                Stage::new(secs(60), 2000),
                Stage::new(secs(10), 0),
            ],
            secs(10),
        )
    }

    #[test]
    fn starts_at_start_vus() {
        assert_eq!(300, java_profile().desired_at(Duration::ZERO));
    }

    #[test]
    fn reaches_each_target_at_stage_boundary() {
        let profile = java_profile();

        assert_eq!(650, profile.desired_at(secs(15)));
        assert_eq!(1000, profile.desired_at(secs(30)));
        assert_eq!(1500, profile.desired_at(secs(60)));
        assert_eq!(2000, profile.desired_at(secs(90)));
        assert_eq!(1000, profile.desired_at(secs(95)));
        assert_eq!(0, profile.desired_at(secs(100)));
    }

    #[test]
    fn is_continuous_and_piecewise_linear() {
        let profile = java_profile();
        let step = Duration::from_millis(10);
        let mut t = Duration::ZERO;
        let mut previous = profile.desired_at(t);

        while t < secs(100) {
            t += step;
            let current = profile.desired_at(t);
            // The steepest stage moves 2000 users in 10s, 2 users per 10ms plus rounding.
            assert!(
                current.abs_diff(previous) <= 3,
                "jump from {previous} to {current} at {t:?}"
            );
            previous = current;
        }
    }

    #[test]
    fn holds_last_target_through_graceful_stop() {
        let profile = RampProfile::new(
            0,
            vec![Stage::new(secs(10), 10), Stage::new(secs(10), 10)],
            secs(5),
        );

        assert_eq!(10, profile.desired_at(secs(20)));
        assert_eq!(10, profile.desired_at(Duration::from_millis(24_999)));
        assert_eq!(0, profile.desired_at(secs(25)));
        assert!(!profile.is_finished(Duration::from_millis(24_999)));
        assert!(profile.is_finished(secs(25)));
        assert_eq!(Some(secs(25)), profile.total_duration());
    }

    #[test]
    fn zero_duration_stage_is_a_jump() {
        let profile = RampProfile::new(
            5,
            vec![
                Stage::new(secs(10), 5),
                Stage::new(Duration::ZERO, 50),
                Stage::new(secs(10), 50),
            ],
            Duration::ZERO,
        );

        assert_eq!(5, profile.desired_at(Duration::from_millis(9_999)));
        assert_eq!(50, profile.desired_at(secs(10)));
        assert_eq!(ScenarioPhase::Steady, profile.phase_at(secs(10)));
    }

    #[test]
    fn empty_stages_hold_start_vus_forever() {
        let profile = RampProfile::new(7, vec![], secs(30));

        assert_eq!(7, profile.desired_at(Duration::ZERO));
        assert_eq!(7, profile.desired_at(secs(1_000_000)));
        assert_eq!(None, profile.total_duration());
        assert!(!profile.is_finished(secs(1_000_000)));
        assert_eq!(ScenarioPhase::Steady, profile.phase_at(secs(5)));
    }

    #[test]
    fn very_long_stage_interpolates_to_its_target() {
        let long = Duration::from_secs(200 * 24 * 3600);
        let profile = RampProfile::new(0, vec![Stage::new(long, 1000)], Duration::ZERO);

        assert_eq!(1000, profile.desired_at(long - Duration::from_nanos(1)));
        assert_eq!(500, profile.desired_at(long / 2));
    }

    #[test]
    fn zero_target_is_allowed() {
        let profile = RampProfile::new(0, vec![Stage::new(secs(10), 0)], Duration::ZERO);

        assert_eq!(0, profile.desired_at(secs(5)));
        assert_eq!(ScenarioPhase::Steady, profile.phase_at(secs(5)));
    }

    #[test]
    fn phases_follow_stages() {
        let profile = java_profile();

        assert_eq!(ScenarioPhase::Ramping, profile.phase_at(Duration::ZERO));
        assert_eq!(ScenarioPhase::Ramping, profile.phase_at(secs(95)));
        assert_eq!(ScenarioPhase::Draining, profile.phase_at(secs(100)));
        assert_eq!(ScenarioPhase::Draining, profile.phase_at(secs(200)));
    }
}
