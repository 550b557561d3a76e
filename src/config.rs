use crate::capture::controller::CaptureTiming;
use crate::estimation::calibration::{CalibrationTarget, default_targets};
use crate::estimation::tdoa::SolverParams;
use crate::estimation::wave_speed::{DEFAULT_WAVE_SPEED_MPS, validate_wave_speed};
use crate::sensor::{
    BoardBounds, EdgePolarity, SensorConfig, SensorLayout, SensorPosition, build_sensor_configs,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Level;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_BOARD_SIZE_M: f64 = 0.4;
pub const DEFAULT_STORE_PATH: &str = "data/wave_speed.json";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub board: Option<BoardSection>,
    #[serde(default)]
    pub sensors: Option<SensorsSection>,
    #[serde(default)]
    pub capture: Option<CaptureTiming>,
    #[serde(default)]
    pub solver: Option<SolverParams>,
    #[serde(default)]
    pub calibration: Option<CalibrationSettings>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoardSection {
    /// Side of the square sensing surface in metres (default: 0.4)
    pub size_m: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorsSection {
    /// GPIO (BCM) pin numbers of the edge inputs, in channel order
    pub gpio_pins: Vec<u8>,
    /// Sensor positions in metres, same order as `gpio_pins`
    pub positions: Vec<SensorPosition>,
    #[serde(default)]
    pub edge: EdgePolarity,
    pub indicator_pin: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationSettings {
    pub default_wave_speed_mps: Option<f64>,
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<CalibrationTarget>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn board(&self) -> Result<BoardBounds, ConfigError> {
        let size = self
            .board
            .as_ref()
            .and_then(|b| b.size_m)
            .unwrap_or(DEFAULT_BOARD_SIZE_M);
        if !size.is_finite() || size <= 0.0 {
            return Err(ConfigError::Invalid(format!("board size {size} m")));
        }
        Ok(BoardBounds::square(size))
    }

    /// Sensor channels in configuration order, or empty vec if not configured.
    pub fn sensor_configs(&self) -> Result<Vec<SensorConfig>, ConfigError> {
        match &self.sensors {
            Some(section) => build_sensor_configs(&section.gpio_pins, &section.positions)
                .map_err(|err| ConfigError::Invalid(err.to_string())),
            None => Ok(Vec::new()),
        }
    }

    pub fn layout(&self) -> Result<SensorLayout, ConfigError> {
        let positions = self
            .sensors
            .as_ref()
            .map(|s| s.positions.clone())
            .unwrap_or_default();
        SensorLayout::new(positions).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn edge_polarity(&self) -> EdgePolarity {
        self.sensors.as_ref().map(|s| s.edge).unwrap_or_default()
    }

    pub fn indicator_pin(&self) -> Option<u8> {
        self.sensors.as_ref().and_then(|s| s.indicator_pin)
    }

    pub fn capture_timing(&self) -> CaptureTiming {
        self.capture.clone().unwrap_or_default()
    }

    pub fn solver_params(&self) -> SolverParams {
        self.solver.clone().unwrap_or_default()
    }

    /// Speed used when nothing valid is persisted (default: 3000 m/s).
    pub fn default_wave_speed(&self) -> Result<f64, ConfigError> {
        let value = self
            .calibration
            .as_ref()
            .and_then(|c| c.default_wave_speed_mps)
            .unwrap_or(DEFAULT_WAVE_SPEED_MPS);
        validate_wave_speed(value).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn store_path(&self) -> &Path {
        self.calibration
            .as_ref()
            .and_then(|c| c.store_path.as_deref())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(DEFAULT_STORE_PATH))
    }

    pub fn calibration_targets(&self) -> Vec<CalibrationTarget> {
        match &self.calibration {
            Some(section) if !section.targets.is_empty() => section.targets.clone(),
            _ => default_targets(),
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Unknown level names fall back to info.
    pub fn log_level(&self) -> Level {
        self.logging.level.parse().unwrap_or(Level::INFO)
    }
}
