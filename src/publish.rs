//! Outbound capture and heartbeat messages.

use crate::api::responses::{CaptureMessage, Heartbeat, HeartbeatHit};
use crate::capture::CaptureSnapshot;
use crate::error::AppError;
use crate::state::{AppState, ImpactEstimate, PublishedCapture};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Transport boundary for capture results.
pub trait ResultPublisher: Send {
    fn publish_capture(&mut self, message: &CaptureMessage) -> Result<(), AppError>;
    fn publish_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), AppError>;

    /// Called on every capture-loop pass, dead-time included.
    fn service(&mut self) {}
}

pub fn capture_message(
    snapshot: &CaptureSnapshot,
    estimate: &ImpactEstimate,
    wave_speed_mps: f64,
) -> CaptureMessage {
    let channels = 0..snapshot.channel_count();
    CaptureMessage {
        mode: estimate.method,
        x: if estimate.valid { estimate.x } else { 0.0 },
        y: if estimate.valid { estimate.y } else { 0.0 },
        n: estimate.sensors_used,
        mask: snapshot.hit_mask,
        t0: snapshot.t0_us,
        vs: wave_speed_mps,
        t: channels
            .clone()
            .map(|c| snapshot.relative_first_us(c))
            .collect(),
        last: channels.map(|c| snapshot.relative_last_us(c)).collect(),
        cnt: snapshot.edge_count.clone(),
    }
}

pub fn heartbeat(wave_speed_mps: f64, last_valid: Option<&ImpactEstimate>) -> Heartbeat {
    Heartbeat {
        vs: wave_speed_mps,
        last: last_valid.filter(|e| e.valid).map(|e| HeartbeatHit {
            mode: e.method,
            x: e.x,
            y: e.y,
            n: e.sensors_used,
        }),
    }
}

/// Publishes into [`AppState`] for the HTTP API.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    state: Arc<RwLock<AppState>>,
}

impl StatePublisher {
    pub fn new(state: Arc<RwLock<AppState>>) -> Self {
        Self { state }
    }
}

impl ResultPublisher for StatePublisher {
    fn publish_capture(&mut self, message: &CaptureMessage) -> Result<(), AppError> {
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.set_capture(PublishedCapture {
            message: message.clone(),
            timestamp: SystemTime::now(),
        });
        Ok(())
    }

    fn publish_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), AppError> {
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.set_heartbeat(heartbeat.clone());
        Ok(())
    }
}
