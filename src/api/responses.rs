use crate::estimation::calibration::CalibrationStatus;
use crate::state::EstimateMethod;
use serde::{Deserialize, Serialize};

/// Per-capture message. `t`, `last` are relative to `t0` in µs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureMessage {
    pub mode: EstimateMethod,
    pub x: f32,
    pub y: f32,
    pub n: usize,
    pub mask: u32,
    pub t0: u64,
    pub vs: f64,
    pub t: Vec<Option<i64>>,
    pub last: Vec<Option<i64>>,
    pub cnt: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeartbeatHit {
    pub mode: EstimateMethod,
    pub x: f32,
    pub y: f32,
    pub n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub vs: f64,
    #[serde(flatten)]
    pub last: Option<HeartbeatHit>,
}

/// Inbound override, `{"set_vs": 3120.5}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SetWaveSpeed {
    #[serde(rename = "set_vs")]
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    SetVs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveSpeedAck {
    pub ack: AckKind,
    pub vs: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CaptureResponse {
    #[serde(flatten)]
    pub capture: CaptureMessage,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CalibrationResponse {
    #[serde(flatten)]
    pub status: CalibrationStatus,
    pub wave_speed_mps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_mps: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SensorsSuccessResponse {
    pub sensors: Vec<SensorResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SensorResponse {
    pub channel: usize,
    pub gpio_pin: u8,
    pub x: f64,
    pub y: f64,
    pub edge_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoData,
    SensorUnavailable,
    StoreError,
    InternalError,
}
