use crate::api::ApiState;
use crate::api::responses::{
    AckKind, CalibrationResponse, CaptureResponse, ErrorCode, ErrorResponse, Heartbeat,
    SensorResponse, SensorsSuccessResponse, SetWaveSpeed, WaveSpeedAck,
};
use crate::error::AppError;
use crate::estimation::calibration::CalibrationSession;
use crate::estimation::wave_speed::apply_wave_speed;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success(T),
    NoContent,
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResponse::NoContent => StatusCode::NO_CONTENT.into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationAction {
    Status,
    Start,
    Next,
    Reset,
    Commit,
}

pub async fn get_capture(State(state): State<ApiState>) -> impl IntoResponse {
    build_capture_response(&state, SystemTime::now())
}

pub async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    build_status_response(&state)
}

pub async fn post_wave_speed(
    State(state): State<ApiState>,
    Json(request): Json<SetWaveSpeed>,
) -> impl IntoResponse {
    build_wave_speed_response(&state, request)
}

pub async fn get_calibration(State(state): State<ApiState>) -> impl IntoResponse {
    build_calibration_response(&state, CalibrationAction::Status)
}

pub async fn post_calibration_start(State(state): State<ApiState>) -> impl IntoResponse {
    build_calibration_response(&state, CalibrationAction::Start)
}

pub async fn post_calibration_next(State(state): State<ApiState>) -> impl IntoResponse {
    build_calibration_response(&state, CalibrationAction::Next)
}

pub async fn post_calibration_reset(State(state): State<ApiState>) -> impl IntoResponse {
    build_calibration_response(&state, CalibrationAction::Reset)
}

pub async fn post_calibration_commit(State(state): State<ApiState>) -> impl IntoResponse {
    build_calibration_response(&state, CalibrationAction::Commit)
}

pub async fn get_sensors(State(state): State<ApiState>) -> impl IntoResponse {
    build_sensors_response(&state, SystemTime::now())
}

fn build_capture_response(state: &ApiState, now: SystemTime) -> ApiResponse<CaptureResponse> {
    let guard = match state.app.read() {
        Ok(guard) => guard,
        Err(_) => return internal_error("/api/capture", "state lock poisoned while reading capture"),
    };
    let capture = guard.capture().cloned();
    drop(guard);

    match capture {
        Some(published) => match format_timestamp(published.timestamp) {
            Ok(timestamp) => ApiResponse::Success(CaptureResponse {
                capture: published.message,
                timestamp,
            }),
            Err(_) => internal_error("/api/capture", "timestamp formatting failure"),
        },
        None => error_response(
            "/api/capture",
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::NoData,
            "No capture available",
            now,
        ),
    }
}

/// Latest heartbeat, or a bare `{vs}` before the capture loop has emitted one.
fn build_status_response(state: &ApiState) -> ApiResponse<Heartbeat> {
    match state.app.read() {
        Ok(guard) => ApiResponse::Success(guard.heartbeat().cloned().unwrap_or(Heartbeat {
            vs: state.wave_speed.get(),
            last: None,
        })),
        Err(_) => internal_error("/api/status", "state lock poisoned while reading heartbeat"),
    }
}

fn build_wave_speed_response(
    state: &ApiState,
    request: SetWaveSpeed,
) -> ApiResponse<WaveSpeedAck> {
    match apply_wave_speed(&state.wave_speed, state.store.as_ref(), request.value) {
        Ok(vs) => ApiResponse::Success(WaveSpeedAck {
            ack: AckKind::SetVs,
            vs,
        }),
        Err(AppError::InvalidCalibrationInput(value)) => {
            warn!(wave_speed_mps = value, "Ignoring out-of-range wave speed override");
            ApiResponse::NoContent
        }
        Err(err) => store_error("/api/wave-speed", &err, SystemTime::now()),
    }
}

fn build_calibration_response(
    state: &ApiState,
    action: CalibrationAction,
) -> ApiResponse<CalibrationResponse> {
    let mut session = match state.calibration.lock() {
        Ok(session) => session,
        Err(_) => {
            return internal_error("/api/calibration", "calibration lock poisoned");
        }
    };

    let committed = match apply_calibration_action(&mut session, action, state) {
        Ok(committed) => committed,
        Err(err) => {
            drop(session);
            return store_error("/api/calibration/commit", &err, SystemTime::now());
        }
    };

    ApiResponse::Success(CalibrationResponse {
        status: session.status(),
        wave_speed_mps: state.wave_speed.get(),
        committed_mps: committed,
    })
}

fn apply_calibration_action(
    session: &mut CalibrationSession,
    action: CalibrationAction,
    state: &ApiState,
) -> Result<Option<f64>, AppError> {
    match action {
        CalibrationAction::Status => {}
        CalibrationAction::Start => session.start(),
        CalibrationAction::Next => {
            session.next_target();
        }
        CalibrationAction::Reset => session.reset(),
        CalibrationAction::Commit => {
            return session.commit(&state.wave_speed, state.store.as_ref());
        }
    }
    Ok(None)
}

fn build_sensors_response(
    state: &ApiState,
    now: SystemTime,
) -> ApiResponse<SensorsSuccessResponse> {
    let guard = match state.app.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/sensors", "state lock poisoned while reading sensors");
        }
    };
    let sensors = guard.sensors().to_vec();
    drop(guard);

    if sensors.is_empty() {
        return error_response(
            "/api/sensors",
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::SensorUnavailable,
            "Sensor list unavailable",
            now,
        );
    }

    let diagnostics = state.capture.diagnostics();
    let sensors = sensors
        .iter()
        .map(|sensor| SensorResponse {
            channel: sensor.channel,
            gpio_pin: sensor.gpio_pin,
            x: sensor.position.x,
            y: sensor.position.y,
            edge_count: diagnostics
                .edge_count
                .get(sensor.channel)
                .copied()
                .unwrap_or(0),
        })
        .collect();

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success(SensorsSuccessResponse { sensors, timestamp }),
        Err(_) => internal_error("/api/sensors", "timestamp formatting failure"),
    }
}

fn error_response<T>(
    route: &str,
    status: StatusCode,
    error_code: ErrorCode,
    message: &str,
    now: SystemTime,
) -> ApiResponse<T> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Error {
            status,
            body: ErrorResponse {
                error_code,
                error_message: message.to_string(),
                timestamp,
            },
        },
        Err(_) => internal_error(route, "timestamp formatting failure"),
    }
}

fn store_error<T>(route: &str, err: &AppError, now: SystemTime) -> ApiResponse<T> {
    error!(route, error = %err, "Failed to persist wave speed");
    error_response(
        route,
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::StoreError,
        "Wave speed applied but not persisted",
        now,
    )
}

fn internal_error<T>(route: &str, message: &str) -> ApiResponse<T> {
    error!(route, message = message, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::responses::CaptureMessage;
    use crate::capture::CaptureState;
    use crate::estimation::calibration::default_targets;
    use crate::estimation::wave_speed::{MemoryStore, StoreError, WaveSpeed, WaveSpeedStore};
    use crate::sensor::mock::{DIAMOND_POSITIONS, arrival_times, diamond_layout};
    use crate::sensor::build_sensor_configs;
    use crate::state::{AppState, EstimateMethod, PublishedCapture};
    use std::sync::{Arc, Mutex, RwLock};
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Debug)]
    struct FailingStore;

    impl WaveSpeedStore for FailingStore {
        fn load(&self) -> Result<Option<f64>, StoreError> {
            Ok(None)
        }

        fn save(&self, _value: f64) -> Result<(), StoreError> {
            Err(StoreError::Write(std::io::Error::other("disk full")))
        }
    }

    fn api_state_with_store(store: Arc<dyn WaveSpeedStore>) -> ApiState {
        ApiState {
            app: Arc::new(RwLock::new(AppState::new())),
            capture: Arc::new(CaptureState::new(4)),
            wave_speed: Arc::new(WaveSpeed::default()),
            calibration: Arc::new(Mutex::new(CalibrationSession::new(
                diamond_layout(),
                default_targets(),
            ))),
            store,
        }
    }

    fn api_state() -> ApiState {
        api_state_with_store(Arc::new(MemoryStore::default()))
    }

    fn poison(state: &ApiState) {
        let app = Arc::clone(&state.app);
        let _ = std::thread::spawn(move || {
            let _guard = app.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
    }

    fn message() -> CaptureMessage {
        CaptureMessage {
            mode: EstimateMethod::Full,
            x: 0.2,
            y: 0.2,
            n: 4,
            mask: 0b1111,
            t0: 1_000,
            vs: 3_000.0,
            t: vec![Some(0), Some(0), Some(0), Some(0)],
            last: vec![Some(0), Some(0), Some(0), Some(0)],
            cnt: vec![1, 1, 1, 1],
        }
    }

    #[test]
    fn capture_returns_latest_message_with_timestamp() -> Result<(), AppError> {
        let state = api_state();
        state
            .app
            .write()
            .map_err(|_| AppError::StateLock)?
            .set_capture(PublishedCapture {
                message: message(),
                timestamp: UNIX_EPOCH + Duration::from_secs(1),
            });

        match build_capture_response(&state, UNIX_EPOCH) {
            ApiResponse::Success(body) => {
                assert_eq!(body.capture, message());
                assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
            }
            _ => panic!("expected capture response"),
        }
        Ok(())
    }

    #[test]
    fn capture_returns_no_data_before_first_window() {
        let state = api_state();

        match build_capture_response(&state, UNIX_EPOCH + Duration::from_secs(2)) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::NoData);
                assert_eq!(body.timestamp, "1970-01-01T00:00:02Z");
            }
            _ => panic!("expected no data response"),
        }
    }

    #[test]
    fn capture_returns_internal_error_when_lock_poisoned() {
        let state = api_state();
        poison(&state);

        match build_capture_response(&state, UNIX_EPOCH) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            _ => panic!("expected internal error response"),
        }
    }

    #[test]
    fn status_falls_back_to_current_wave_speed() {
        let state = api_state();

        match build_status_response(&state) {
            ApiResponse::Success(body) => {
                assert_eq!(body.vs, 3_000.0);
                assert_eq!(body.last, None);
            }
            _ => panic!("expected status response"),
        }
    }

    #[test]
    fn valid_override_is_applied_persisted_and_acked() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryStore::default());
        let state = api_state_with_store(store.clone());

        match build_wave_speed_response(&state, SetWaveSpeed { value: 3_120.5 }) {
            ApiResponse::Success(ack) => {
                assert_eq!(ack.ack, AckKind::SetVs);
                assert_eq!(ack.vs, 3_120.5);
            }
            _ => panic!("expected ack"),
        }
        assert_eq!(state.wave_speed.get(), 3_120.5);
        assert_eq!(store.load()?, Some(3_120.5));
        Ok(())
    }

    #[test]
    fn out_of_range_override_is_silently_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryStore::default());
        let state = api_state_with_store(store.clone());

        assert!(matches!(
            build_wave_speed_response(&state, SetWaveSpeed { value: 25_000.0 }),
            ApiResponse::NoContent
        ));
        assert_eq!(state.wave_speed.get(), 3_000.0);
        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn store_failure_reports_store_error() {
        let state = api_state_with_store(Arc::new(FailingStore));

        match build_wave_speed_response(&state, SetWaveSpeed { value: 2_800.0 }) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ErrorCode::StoreError);
            }
            _ => panic!("expected store error"),
        }
        assert_eq!(state.wave_speed.get(), 2_800.0);
    }

    #[test]
    fn calibration_flow_commits_after_enough_samples() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemoryStore::default());
        let state = api_state_with_store(store.clone());
        build_calibration_response(&state, CalibrationAction::Start);
        build_calibration_response(&state, CalibrationAction::Next);

        match build_calibration_response(&state, CalibrationAction::Commit) {
            ApiResponse::Success(body) => {
                assert!(body.status.active);
                assert_eq!(body.committed_mps, None);
            }
            _ => panic!("expected calibration status"),
        }

        let layout = diamond_layout();
        {
            let mut session = state.calibration.lock().map_err(|_| AppError::StateLock)?;
            for strike in 0..5 {
                let arrivals = arrival_times(&layout, 0.2, 0.1, 1_500.0, 10_000 * (strike + 1));
                session.add_sample(&arrivals);
            }
        }

        match build_calibration_response(&state, CalibrationAction::Commit) {
            ApiResponse::Success(body) => {
                let committed = body.committed_mps.ok_or("expected commit")?;
                assert!((committed - 1_500.0).abs() / 1_500.0 < 0.02);
                assert_eq!(body.wave_speed_mps, committed);
                assert_eq!(store.load()?, Some(committed));
            }
            _ => panic!("expected calibration status"),
        }
        Ok(())
    }

    #[test]
    fn sensors_list_positions_and_live_edge_counts() -> Result<(), Box<dyn std::error::Error>> {
        let state = api_state();
        let configs = build_sensor_configs(&[17, 27, 22, 23], &DIAMOND_POSITIONS)?;
        state
            .app
            .write()
            .map_err(|_| AppError::StateLock)?
            .set_sensors(configs);
        state.capture.on_edge(2, 1_000);
        state.capture.on_edge(2, 1_040);

        match build_sensors_response(&state, UNIX_EPOCH + Duration::from_secs(3)) {
            ApiResponse::Success(body) => {
                assert_eq!(body.sensors.len(), 4);
                assert_eq!(body.sensors[2].gpio_pin, 22);
                assert_eq!(body.sensors[2].x, 0.3);
                assert_eq!(body.sensors[2].edge_count, 2);
                assert_eq!(body.sensors[0].edge_count, 0);
                assert_eq!(body.timestamp, "1970-01-01T00:00:03Z");
            }
            _ => panic!("expected sensors response"),
        }
        Ok(())
    }

    #[test]
    fn sensors_unavailable_when_none_configured() {
        let state = api_state();

        match build_sensors_response(&state, UNIX_EPOCH) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::SensorUnavailable);
            }
            _ => panic!("expected sensor unavailable response"),
        }
    }
}
