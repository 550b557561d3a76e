//! Capture window scheduling: open, close, solve, publish, dead-time, re-arm.

use crate::bus::indicator::CaptureIndicator;
use crate::capture::{CaptureSnapshot, CaptureState, Clock};
use crate::estimation::calibration::CalibrationSession;
use crate::estimation::model::LocationModel;
use crate::estimation::wave_speed::WaveSpeed;
use crate::publish::{self, ResultPublisher};
use crate::api::responses::CaptureMessage;
use crate::state::ImpactEstimate;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Window, dead-time and heartbeat timing, loaded from `[capture]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureTiming {
    pub window_us: u64,
    pub deadtime_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            window_us: 8_000,
            deadtime_ms: 120,
            heartbeat_interval_ms: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub snapshot: CaptureSnapshot,
    pub estimate: ImpactEstimate,
    pub message: CaptureMessage,
    /// Running calibration estimate, when this capture was taken as a calibration sample.
    pub calibration_estimate: Option<f64>,
}

pub struct CaptureController {
    state: Arc<CaptureState>,
    clock: Arc<dyn Clock>,
    timing: CaptureTiming,
    model: Arc<dyn LocationModel>,
    wave_speed: Arc<WaveSpeed>,
    calibration: Arc<Mutex<CalibrationSession>>,
    publisher: Box<dyn ResultPublisher>,
    indicator: Box<dyn CaptureIndicator>,
    last_valid: Option<ImpactEstimate>,
    last_heartbeat_ms: Option<u64>,
}

impl CaptureController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<CaptureState>,
        clock: Arc<dyn Clock>,
        timing: CaptureTiming,
        model: Arc<dyn LocationModel>,
        wave_speed: Arc<WaveSpeed>,
        calibration: Arc<Mutex<CalibrationSession>>,
        publisher: Box<dyn ResultPublisher>,
        indicator: Box<dyn CaptureIndicator>,
    ) -> Self {
        Self {
            state,
            clock,
            timing,
            model,
            wave_speed,
            calibration,
            publisher,
            indicator,
            last_valid: None,
            last_heartbeat_ms: None,
        }
    }

    pub fn last_valid(&self) -> Option<&ImpactEstimate> {
        self.last_valid.as_ref()
    }

    /// One scheduling pass of the window state machine.
    pub fn poll(&mut self) -> Option<CaptureReport> {
        if let Some((trigger, t0_us)) = self.state.open_pending() {
            self.indicator.capture_started();
            info!(trigger, t0_us, "Capture started");
        }

        let report = self
            .state
            .close_if_elapsed(
                self.clock.now_us(),
                self.timing.window_us,
                self.clock.now_ms(),
            )
            .map(|snapshot| self.process(snapshot));

        if self
            .state
            .rearm_if_elapsed(self.clock.now_ms(), self.timing.deadtime_ms)
        {
            self.indicator.rearmed();
            debug!("Capture re-armed");
        }

        report
    }

    /// Poll, service the publisher and emit the heartbeat when due.
    pub fn tick(&mut self) -> Option<CaptureReport> {
        let report = self.poll();
        self.publisher.service();

        let now_ms = self.clock.now_ms();
        let due = self.last_heartbeat_ms.is_none_or(|last| {
            now_ms.saturating_sub(last) >= self.timing.heartbeat_interval_ms
        });
        if due {
            let heartbeat = publish::heartbeat(self.wave_speed.get(), self.last_valid.as_ref());
            if let Err(err) = self.publisher.publish_heartbeat(&heartbeat) {
                warn!(error = %err, "Failed to publish heartbeat");
            }
            self.last_heartbeat_ms = Some(now_ms);
        }

        report
    }

    fn process(&mut self, snapshot: CaptureSnapshot) -> CaptureReport {
        let wave_speed_mps = self.wave_speed.get();
        let estimate = self.model.locate(&snapshot.first_arrival_us, wave_speed_mps);
        info!(
            mode = estimate.method.as_str(),
            x = estimate.x,
            y = estimate.y,
            sensors = estimate.sensors_used,
            mask = format_args!("{:#b}", snapshot.hit_mask),
            t0_us = snapshot.t0_us,
            "Capture closed"
        );
        for channel in 0..snapshot.channel_count() {
            debug!(
                channel,
                first_us = ?snapshot.relative_first_us(channel),
                last_us = ?snapshot.relative_last_us(channel),
                edges = snapshot.edge_count[channel],
                "Channel diagnostics"
            );
        }

        let calibration_estimate = match self.calibration.lock() {
            Ok(mut session) if session.is_active() => {
                session.add_sample(&snapshot.first_arrival_us)
            }
            Ok(_) => None,
            Err(_) => {
                warn!("Calibration lock poisoned, sample dropped");
                None
            }
        };

        let message = publish::capture_message(&snapshot, &estimate, wave_speed_mps);
        if let Err(err) = self.publisher.publish_capture(&message) {
            warn!(error = %err, "Failed to publish capture");
        }

        self.last_valid = estimate.valid.then_some(estimate);

        CaptureReport {
            snapshot,
            estimate,
            message,
            calibration_estimate,
        }
    }
}

/// Run the capture loop until `stop` is raised.
pub fn run_capture_loop(mut controller: CaptureController, stop: &AtomicBool, idle: Duration) {
    info!("Capture loop running");
    while !stop.load(Ordering::Relaxed) {
        controller.tick();
        std::thread::sleep(idle);
    }
    info!("Capture loop stopped");
}

pub fn spawn_capture_thread(
    controller: CaptureController,
    stop: Arc<AtomicBool>,
    idle: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || run_capture_loop(controller, &stop, idle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::responses::Heartbeat;
    use crate::capture::{CapturePhase, ManualClock};
    use crate::error::AppError;
    use crate::estimation::TdoaLocator;
    use crate::estimation::calibration::default_targets;
    use crate::estimation::tdoa::SolverParams;
    use crate::sensor::BoardBounds;
    use crate::sensor::mock::{StrikeOptions, arrival_times, diamond_layout, inject_strike};
    use crate::state::EstimateMethod;

    #[derive(Clone, Default)]
    struct Recorder {
        captures: Arc<Mutex<Vec<CaptureMessage>>>,
        heartbeats: Arc<Mutex<Vec<Heartbeat>>>,
        indicator: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ResultPublisher for Recorder {
        fn publish_capture(&mut self, message: &CaptureMessage) -> Result<(), AppError> {
            self.captures
                .lock()
                .map_err(|_| AppError::StateLock)?
                .push(message.clone());
            Ok(())
        }

        fn publish_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), AppError> {
            self.heartbeats
                .lock()
                .map_err(|_| AppError::StateLock)?
                .push(heartbeat.clone());
            Ok(())
        }
    }

    impl CaptureIndicator for Recorder {
        fn capture_started(&mut self) {
            if let Ok(mut log) = self.indicator.lock() {
                log.push("on");
            }
        }

        fn rearmed(&mut self) {
            if let Ok(mut log) = self.indicator.lock() {
                log.push("off");
            }
        }
    }

    struct Harness {
        controller: CaptureController,
        state: Arc<CaptureState>,
        clock: Arc<ManualClock>,
        recorder: Recorder,
        calibration: Arc<Mutex<CalibrationSession>>,
    }

    fn harness() -> Harness {
        let state = Arc::new(CaptureState::new(4));
        let clock = Arc::new(ManualClock::new(1_000));
        let recorder = Recorder::default();
        let calibration = Arc::new(Mutex::new(CalibrationSession::new(
            diamond_layout(),
            default_targets(),
        )));
        let model = Arc::new(TdoaLocator::new(
            diamond_layout(),
            BoardBounds::square(0.4),
            SolverParams::default(),
        ));
        let controller = CaptureController::new(
            Arc::clone(&state),
            clock.clone(),
            CaptureTiming::default(),
            model,
            Arc::new(WaveSpeed::default()),
            Arc::clone(&calibration),
            Box::new(recorder.clone()),
            Box::new(recorder.clone()),
        );
        Harness {
            controller,
            state,
            clock,
            recorder,
            calibration,
        }
    }

    /// Inject a strike with the clock standing at its first arrival.
    fn strike_at(h: &Harness, x: f64, y: f64) {
        let arrivals = arrival_times(&diamond_layout(), x, y, 3_000.0, h.clock.now_us());
        if let Some(t0) = arrivals.iter().copied().min() {
            h.clock.set_us(t0);
        }
        inject_strike(&h.state, &arrivals, StrikeOptions::default());
    }

    #[test]
    fn strike_at_center_is_solved_after_window() {
        let mut h = harness();
        strike_at(&h, 0.2, 0.2);

        assert!(h.controller.poll().is_none());
        assert_eq!(h.state.phase(), CapturePhase::Capturing);

        h.clock.advance_us(7_999);
        assert!(h.controller.poll().is_none());

        h.clock.advance_us(1);
        let report = h.controller.poll().expect("window closes");

        assert_eq!(report.estimate.method, EstimateMethod::Full);
        assert!((report.estimate.x - 0.2).abs() < 1e-4);
        assert!((report.estimate.y - 0.2).abs() < 1e-4);
        assert_eq!(report.message.mask, 0b1111);
        assert_eq!(h.state.phase(), CapturePhase::Deadtime);
        assert_eq!(h.controller.last_valid(), Some(&report.estimate));
    }

    #[test]
    fn two_sensor_capture_is_forwarded_as_partial() {
        let mut h = harness();
        let t0 = h.clock.now_us();
        inject_strike(&h.state, &[t0, 0, t0 + 30, 0], StrikeOptions::default());

        h.controller.poll();
        h.clock.advance_us(8_000);
        let report = h.controller.poll().expect("window closes");

        assert_eq!(report.estimate.method, EstimateMethod::Partial);
        assert_eq!(report.message.t, vec![Some(0), None, Some(30), None]);
        assert_eq!(h.recorder.captures.lock().map(|c| c.len()).unwrap_or(0), 1);
    }

    #[test]
    fn deadtime_edges_count_but_open_no_window() {
        let mut h = harness();
        let t0 = h.clock.now_us();
        inject_strike(&h.state, &[t0, t0 + 10, t0 + 20, 0], StrikeOptions::default());
        h.controller.poll();
        h.clock.advance_us(8_000);
        assert!(h.controller.poll().is_some());

        h.clock.advance_ms(50);
        let now = h.clock.now_us();
        h.state.on_edge(3, now);
        h.state.on_edge(3, now + 5);
        assert!(h.controller.poll().is_none());

        assert_eq!(h.state.phase(), CapturePhase::Deadtime);
        assert_eq!(h.state.diagnostics().edge_count[3], 2);

        h.clock.advance_ms(69);
        assert!(h.controller.poll().is_none());
        assert_eq!(h.state.phase(), CapturePhase::Deadtime);

        h.clock.advance_ms(1);
        assert!(h.controller.poll().is_none());
        assert_eq!(h.state.phase(), CapturePhase::Idle);
        assert_eq!(h.state.hit_mask(), 0);
        assert_eq!(h.recorder.captures.lock().map(|c| c.len()).unwrap_or(0), 1);
        assert_eq!(
            h.recorder.indicator.lock().map(|l| l.clone()).unwrap_or_default(),
            vec!["on", "off"]
        );
    }

    #[test]
    fn rearmed_cycle_does_not_reuse_stale_arrivals() {
        let mut h = harness();
        let t0 = h.clock.now_us();
        inject_strike(&h.state, &[t0, t0 + 10, t0 + 20, t0 + 30], StrikeOptions::default());
        h.controller.poll();
        h.clock.advance_us(8_000);
        h.controller.poll();
        h.clock.advance_ms(120);
        h.controller.poll();
        assert_eq!(h.state.phase(), CapturePhase::Idle);

        let t1 = h.clock.now_us();
        h.state.on_edge(2, t1);
        h.controller.poll();
        h.clock.advance_us(8_000);
        let report = h.controller.poll().expect("second window closes");

        assert_eq!(report.snapshot.first_arrival_us, vec![0, 0, t1, 0]);
        assert_eq!(report.estimate.method, EstimateMethod::Nearest);
    }

    #[test]
    fn active_calibration_receives_snapshot() {
        let mut h = harness();
        if let Ok(mut session) = h.calibration.lock() {
            session.start();
            session.next_target();
        }
        strike_at(&h, 0.2, 0.1);

        h.controller.poll();
        h.clock.advance_us(8_000);
        let report = h.controller.poll().expect("window closes");

        assert!(report.calibration_estimate.is_some());
        let samples = h.calibration.lock().map(|s| s.sample_count()).unwrap_or(0);
        assert_eq!(samples, 1);
    }

    #[test]
    fn heartbeat_follows_interval_and_carries_last_estimate() {
        let mut h = harness();
        h.controller.tick();
        h.clock.advance_ms(10);
        h.controller.tick();
        h.clock.advance_ms(15);
        h.controller.tick();

        let heartbeats = h.recorder.heartbeats.lock().map(|b| b.clone()).unwrap_or_default();
        assert_eq!(heartbeats.len(), 2);
        assert!(heartbeats.iter().all(|b| b.last.is_none()));

        strike_at(&h, 0.2, 0.2);
        h.controller.tick();
        h.clock.advance_us(25_000);
        h.controller.tick();

        let heartbeats = h.recorder.heartbeats.lock().map(|b| b.clone()).unwrap_or_default();
        let last = heartbeats.last().and_then(|b| b.last);
        assert_eq!(last.map(|hit| hit.mode), Some(EstimateMethod::Full));
    }
}
