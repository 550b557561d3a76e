//! Wave-speed calibration from strikes at known targets.
//!
//! Each sample contributes `a = |target - s_i| - |target - s_ref|` (m) and
//! `b = t_i - t_ref` (s) for every non-reference channel. The estimate is the
//! zero-intercept least-squares slope `Σab / Σbb`.

use crate::error::AppError;
use crate::estimation::tdoa::reference_channel;
use crate::estimation::wave_speed::{
    WaveSpeed, WaveSpeedStore, apply_wave_speed, validate_wave_speed,
};
use crate::sensor::SensorLayout;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const MIN_COMMIT_SAMPLES: usize = 5;

const MIN_SUM_BB: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CalibrationTarget {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

impl CalibrationTarget {
    pub fn new(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
        }
    }
}

pub fn default_targets() -> Vec<CalibrationTarget> {
    vec![
        CalibrationTarget::new("Center", 0.2, 0.2),
        CalibrationTarget::new("Top", 0.2, 0.1),
        CalibrationTarget::new("Bottom", 0.2, 0.3),
        CalibrationTarget::new("Left", 0.1, 0.2),
        CalibrationTarget::new("Right", 0.3, 0.2),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationStatus {
    pub active: bool,
    pub target_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<CalibrationTarget>,
    pub samples: usize,
    pub estimate_mps: Option<f64>,
    pub can_commit: bool,
}

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    layout: SensorLayout,
    targets: Vec<CalibrationTarget>,
    active: bool,
    target_index: usize,
    sum_ab: f64,
    sum_bb: f64,
    samples: usize,
}

impl CalibrationSession {
    pub fn new(layout: SensorLayout, targets: Vec<CalibrationTarget>) -> Self {
        Self {
            layout,
            targets,
            active: false,
            target_index: 0,
            sum_ab: 0.0,
            sum_bb: 0.0,
            samples: 0,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
        self.target_index = 0;
        self.clear_sums();
        info!(
            target_name = ?self.current_target().map(|t| &t.name),
            "Calibration started"
        );
    }

    /// Advance to the next target, staying on the last one.
    pub fn next_target(&mut self) -> Option<&CalibrationTarget> {
        if self.target_index + 1 < self.targets.len() {
            self.target_index += 1;
        }
        self.targets.get(self.target_index)
    }

    /// Drop accumulated samples; the active target is kept.
    pub fn reset(&mut self) {
        self.clear_sums();
    }

    fn clear_sums(&mut self) {
        self.sum_ab = 0.0;
        self.sum_bb = 0.0;
        self.samples = 0;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn current_target(&self) -> Option<&CalibrationTarget> {
        self.targets.get(self.target_index)
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn estimate(&self) -> Option<f64> {
        if self.sum_bb <= MIN_SUM_BB {
            return None;
        }
        let estimate = self.sum_ab / self.sum_bb;
        estimate.is_finite().then_some(estimate)
    }

    pub fn can_commit(&self) -> bool {
        self.samples >= MIN_COMMIT_SAMPLES
            && self
                .estimate()
                .is_some_and(|estimate| validate_wave_speed(estimate).is_ok())
    }

    /// Add a capture taken at the current target. Ignored while inactive.
    pub fn add_sample(&mut self, arrivals_us: &[u64]) -> Option<f64> {
        if !self.active {
            return None;
        }
        let (x, y) = self.current_target().map(|t| (t.x, t.y))?;
        self.add_sample_at(arrivals_us, x, y)
    }

    /// Add a capture taken at `(x, y)`. Returns the updated estimate when the
    /// capture contributed at least one channel pair.
    pub fn add_sample_at(&mut self, arrivals_us: &[u64], x: f64, y: f64) -> Option<f64> {
        let arrivals_us = &arrivals_us[..arrivals_us.len().min(self.layout.len())];
        let reference = reference_channel(arrivals_us)?;
        let reference_position = self.layout.position(reference)?;
        let t_ref = arrivals_us[reference];
        let d_ref = reference_position.distance_to(x, y);

        let mut used = false;
        for (channel, t) in arrivals_us.iter().enumerate() {
            if channel == reference || *t == 0 {
                continue;
            }
            let Some(position) = self.layout.position(channel) else {
                continue;
            };
            let a = position.distance_to(x, y) - d_ref;
            let b = (*t as f64 - t_ref as f64) * 1e-6;
            self.sum_ab += a * b;
            self.sum_bb += b * b;
            used = true;
        }

        if !used {
            return None;
        }
        self.samples += 1;
        let estimate = self.estimate();
        debug!(
            samples = self.samples,
            estimate_mps = ?estimate,
            "Calibration sample accumulated"
        );
        estimate
    }

    /// Commit the estimate once it is eligible; otherwise a no-op returning `None`.
    pub fn commit(
        &self,
        wave_speed: &WaveSpeed,
        store: &dyn WaveSpeedStore,
    ) -> Result<Option<f64>, AppError> {
        if !self.can_commit() {
            debug!(
                samples = self.samples,
                estimate_mps = ?self.estimate(),
                "Calibration commit skipped"
            );
            return Ok(None);
        }
        match self.estimate() {
            Some(estimate) => apply_wave_speed(wave_speed, store, estimate).map(Some),
            None => Ok(None),
        }
    }

    pub fn status(&self) -> CalibrationStatus {
        CalibrationStatus {
            active: self.active,
            target_index: self.target_index,
            target: self.current_target().cloned(),
            samples: self.samples,
            estimate_mps: self.estimate(),
            can_commit: self.can_commit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::wave_speed::MemoryStore;
    use crate::sensor::mock::{arrival_times, diamond_layout};

    const TRUE_SPEED: f64 = 1_200.0;

    fn sample_points() -> [(f64, f64); 6] {
        [
            (0.26, 0.16),
            (0.14, 0.25),
            (0.22, 0.27),
            (0.12, 0.13),
            (0.29, 0.31),
            (0.18, 0.09),
        ]
    }

    #[test]
    fn estimate_converges_to_true_speed() {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();

        for (x, y) in sample_points() {
            let arrivals = arrival_times(&layout, x, y, TRUE_SPEED, 5_000);
            session.add_sample_at(&arrivals, x, y);
        }

        let estimate = session.estimate().expect("estimate available");
        assert!(
            ((estimate - TRUE_SPEED) / TRUE_SPEED).abs() < 0.02,
            "estimate {estimate}"
        );
    }

    #[test]
    fn commit_becomes_eligible_at_fifth_sample() {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();

        for (n, (x, y)) in sample_points().into_iter().enumerate() {
            let arrivals = arrival_times(&layout, x, y, TRUE_SPEED, 5_000);
            session.add_sample_at(&arrivals, x, y);
            assert_eq!(session.sample_count(), n + 1);
            assert_eq!(session.can_commit(), n + 1 >= MIN_COMMIT_SAMPLES);
        }
    }

    #[test]
    fn commit_before_five_samples_is_a_no_op() -> Result<(), AppError> {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();
        let (x, y) = (0.26, 0.16);
        let arrivals = arrival_times(&layout, x, y, TRUE_SPEED, 5_000);
        session.add_sample_at(&arrivals, x, y);

        let speed = WaveSpeed::default();
        let store = MemoryStore::default();
        let committed = session.commit(&speed, &store)?;

        assert_eq!(committed, None);
        assert_eq!(speed.get(), 3_000.0);
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn eligible_commit_updates_and_persists_speed() -> Result<(), AppError> {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();
        for (x, y) in sample_points() {
            let arrivals = arrival_times(&layout, x, y, TRUE_SPEED, 5_000);
            session.add_sample_at(&arrivals, x, y);
        }

        let speed = WaveSpeed::default();
        let store = MemoryStore::default();
        let committed = session.commit(&speed, &store)?.expect("commit applied");

        assert_eq!(speed.get(), committed);
        assert_eq!(store.load()?, Some(committed));
        Ok(())
    }

    #[test]
    fn out_of_range_estimate_is_never_eligible() {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();
        // 100 m/s is below the accepted range.
        for (x, y) in sample_points() {
            let arrivals = arrival_times(&layout, x, y, 100.0, 5_000);
            session.add_sample_at(&arrivals, x, y);
        }

        assert!(session.sample_count() >= MIN_COMMIT_SAMPLES);
        assert!(!session.can_commit());
    }

    #[test]
    fn inactive_session_ignores_captures() {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        let arrivals = arrival_times(&layout, 0.2, 0.1, TRUE_SPEED, 5_000);

        assert_eq!(session.add_sample(&arrivals), None);
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn single_arrival_does_not_count_as_sample() {
        let mut session = CalibrationSession::new(diamond_layout(), default_targets());
        session.start();

        assert_eq!(session.add_sample(&[0, 0, 1_000, 0]), None);
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn targets_advance_and_reset_keeps_position() {
        let layout = diamond_layout();
        let mut session = CalibrationSession::new(layout.clone(), default_targets());
        session.start();
        let top = session.next_target().cloned();
        assert_eq!(top.map(|t| t.name), Some("Top".to_string()));

        let arrivals = arrival_times(&layout, 0.2, 0.1, TRUE_SPEED, 5_000);
        assert!(session.add_sample(&arrivals).is_some());
        session.reset();

        assert_eq!(session.sample_count(), 0);
        assert_eq!(session.status().target_index, 1);

        for _ in 0..10 {
            session.next_target();
        }
        assert_eq!(session.status().target_index, 4);
    }
}
