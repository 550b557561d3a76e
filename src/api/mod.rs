use crate::capture::CaptureState;
use crate::estimation::calibration::CalibrationSession;
use crate::estimation::wave_speed::{WaveSpeed, WaveSpeedStore};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::{Arc, Mutex, RwLock};

pub mod handlers;
pub mod responses;

/// Handles shared between the HTTP API and the capture loop.
#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<RwLock<AppState>>,
    pub capture: Arc<CaptureState>,
    pub wave_speed: Arc<WaveSpeed>,
    pub calibration: Arc<Mutex<CalibrationSession>>,
    pub store: Arc<dyn WaveSpeedStore>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/capture", get(handlers::get_capture))
        .route("/api/status", get(handlers::get_status))
        .route("/api/wave-speed", post(handlers::post_wave_speed))
        .route("/api/calibration", get(handlers::get_calibration))
        .route("/api/calibration/start", post(handlers::post_calibration_start))
        .route("/api/calibration/next", post(handlers::post_calibration_next))
        .route("/api/calibration/reset", post(handlers::post_calibration_reset))
        .route("/api/calibration/commit", post(handlers::post_calibration_commit))
        .route("/api/sensors", get(handlers::get_sensors))
        .with_state(state)
}
