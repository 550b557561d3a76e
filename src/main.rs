use impact_locator::api::{self, ApiState};
use impact_locator::bus::indicator::create_indicator;
use impact_locator::capture::controller::{
    CaptureController, DEFAULT_POLL_INTERVAL, spawn_capture_thread,
};
use impact_locator::capture::{CaptureState, Clock, MonotonicClock};
use impact_locator::config;
use impact_locator::estimation::TdoaLocator;
use impact_locator::estimation::calibration::CalibrationSession;
use impact_locator::estimation::wave_speed::{
    JsonFileStore, WaveSpeed, WaveSpeedStore, load_wave_speed,
};
use impact_locator::publish::StatePublisher;
use impact_locator::state::AppState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        app = %config.app.name,
        config_path = config::DEFAULT_CONFIG_PATH,
        "impact-locator starting"
    );

    let board = config.board()?;
    let layout = config.layout()?;
    let sensor_configs = config.sensor_configs()?;

    let store: Arc<dyn WaveSpeedStore> = Arc::new(JsonFileStore::new(config.store_path()));
    let initial_speed = load_wave_speed(store.as_ref(), config.default_wave_speed()?);
    let wave_speed = Arc::new(WaveSpeed::new(initial_speed)?);
    let calibration = Arc::new(Mutex::new(CalibrationSession::new(
        layout.clone(),
        config.calibration_targets(),
    )));

    let state = Arc::new(RwLock::new(AppState::new()));
    if let Ok(mut guard) = state.write() {
        guard.set_sensors(sensor_configs.clone());
    } else {
        tracing::warn!("State lock poisoned while storing sensors");
    }

    let capture_state = Arc::new(CaptureState::new(layout.len()));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    #[cfg(target_os = "linux")]
    let _edge_inputs = bind_edge_inputs(&config, &sensor_configs, &capture_state);
    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!(
            count = sensor_configs.len(),
            "Edge interrupts require Linux/Raspberry Pi - capture will stay idle"
        );
    }

    let timing = config.capture_timing();
    tracing::info!(
        sensors = layout.len(),
        window_us = timing.window_us,
        deadtime_ms = timing.deadtime_ms,
        wave_speed_mps = wave_speed.get(),
        "Starting capture loop"
    );
    let controller = CaptureController::new(
        Arc::clone(&capture_state),
        clock,
        timing,
        Arc::new(TdoaLocator::new(layout, board, config.solver_params())),
        Arc::clone(&wave_speed),
        Arc::clone(&calibration),
        Box::new(StatePublisher::new(Arc::clone(&state))),
        create_indicator(config.indicator_pin()),
    );
    let stop_flag = Arc::new(AtomicBool::new(false));
    let capture_handle =
        spawn_capture_thread(controller, Arc::clone(&stop_flag), DEFAULT_POLL_INTERVAL);

    let app = api::router(ApiState {
        app: Arc::clone(&state),
        capture: capture_state,
        wave_speed,
        calibration,
        store,
    });
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    stop_flag.store(true, Ordering::Relaxed);
    if capture_handle.join().is_err() {
        tracing::error!("Capture thread panicked");
    }

    Ok(())
}

/// Attach GPIO interrupts; capture stays idle when this fails.
#[cfg(target_os = "linux")]
fn bind_edge_inputs(
    config: &config::Config,
    sensor_configs: &[impact_locator::sensor::SensorConfig],
    capture_state: &Arc<CaptureState>,
) -> Option<impact_locator::bus::edges::RppalEdgeInputs> {
    use impact_locator::bus::edges::{EdgeSink, RppalEdgeInputs};

    if sensor_configs.is_empty() {
        tracing::warn!("No sensors configured in [sensors].gpio_pins");
        return None;
    }

    let sink: Arc<dyn EdgeSink> = capture_state.clone();
    match RppalEdgeInputs::new(sensor_configs, config.edge_polarity(), sink) {
        Ok(inputs) => {
            tracing::info!(count = inputs.len(), "Edge inputs ready");
            Some(inputs)
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to initialize GPIO edge inputs");
            None
        }
    }
}
