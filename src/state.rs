use crate::api::responses::{CaptureMessage, Heartbeat};
use crate::sensor::SensorConfig;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateMethod {
    #[serde(rename = "tdoa")]
    Full,
    Partial,
    Nearest,
    None,
}

impl EstimateMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "tdoa",
            Self::Partial => "partial",
            Self::Nearest => "nearest",
            Self::None => "none",
        }
    }
}

/// Result of one closed capture window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactEstimate {
    pub valid: bool,
    pub x: f32,
    pub y: f32,
    pub method: EstimateMethod,
    pub sensors_used: usize,
}

impl ImpactEstimate {
    pub fn none(sensors_used: usize) -> Self {
        Self {
            valid: false,
            x: 0.0,
            y: 0.0,
            method: EstimateMethod::None,
            sensors_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedCapture {
    pub message: CaptureMessage,
    pub timestamp: SystemTime,
}

#[derive(Debug)]
pub struct AppState {
    sensors: Vec<SensorConfig>,
    capture: Option<PublishedCapture>,
    capture_tx: watch::Sender<Option<PublishedCapture>>,
    heartbeat: Option<Heartbeat>,
    heartbeat_tx: watch::Sender<Option<Heartbeat>>,
}

impl AppState {
    pub fn new() -> Self {
        let (capture_tx, _capture_rx) = watch::channel(None);
        let (heartbeat_tx, _heartbeat_rx) = watch::channel(None);
        Self {
            sensors: Vec::new(),
            capture: None,
            capture_tx,
            heartbeat: None,
            heartbeat_tx,
        }
    }

    pub fn sensors(&self) -> &[SensorConfig] {
        &self.sensors
    }

    pub fn set_sensors(&mut self, sensors: Vec<SensorConfig>) {
        self.sensors = sensors;
    }

    pub fn capture(&self) -> Option<&PublishedCapture> {
        self.capture.as_ref()
    }

    pub fn subscribe_capture(&self) -> watch::Receiver<Option<PublishedCapture>> {
        self.capture_tx.subscribe()
    }

    pub fn set_capture(&mut self, capture: PublishedCapture) {
        self.capture = Some(capture.clone());
        self.capture_tx.send_replace(Some(capture));
    }

    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.heartbeat.as_ref()
    }

    pub fn subscribe_heartbeat(&self) -> watch::Receiver<Option<Heartbeat>> {
        self.heartbeat_tx.subscribe()
    }

    pub fn set_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.heartbeat = Some(heartbeat.clone());
        self.heartbeat_tx.send_replace(Some(heartbeat));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
