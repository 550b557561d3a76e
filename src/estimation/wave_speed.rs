//! Process-wide wave propagation speed and its persistence.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

pub const MIN_WAVE_SPEED_MPS: f64 = 500.0;
pub const MAX_WAVE_SPEED_MPS: f64 = 20_000.0;
pub const DEFAULT_WAVE_SPEED_MPS: f64 = 3_000.0;

pub fn validate_wave_speed(value: f64) -> Result<f64, AppError> {
    if value.is_finite() && (MIN_WAVE_SPEED_MPS..=MAX_WAVE_SPEED_MPS).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::InvalidCalibrationInput(value))
    }
}

/// Shared wave speed in m/s, read on every solve.
#[derive(Debug)]
pub struct WaveSpeed {
    bits: AtomicU64,
}

impl WaveSpeed {
    pub fn new(value: f64) -> Result<Self, AppError> {
        let value = validate_wave_speed(value)?;
        Ok(Self {
            bits: AtomicU64::new(value.to_bits()),
        })
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Replace the current speed; out-of-range values leave it untouched.
    pub fn set(&self, value: f64) -> Result<f64, AppError> {
        let value = validate_wave_speed(value)?;
        self.bits.store(value.to_bits(), Ordering::Release);
        Ok(value)
    }
}

impl Default for WaveSpeed {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(DEFAULT_WAVE_SPEED_MPS.to_bits()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read wave speed store: {0}")]
    Read(std::io::Error),
    #[error("failed to write wave speed store: {0}")]
    Write(std::io::Error),
    #[error("failed to parse wave speed store: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Key/value persistence for the calibrated wave speed.
pub trait WaveSpeedStore: Send + Sync + std::fmt::Debug {
    fn load(&self) -> Result<Option<f64>, StoreError>;
    fn save(&self, value: f64) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredWaveSpeed {
    wave_speed_mps: f64,
}

/// JSON file store. A missing file means nothing has been persisted yet.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WaveSpeedStore for JsonFileStore {
    fn load(&self) -> Result<Option<f64>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Read(err)),
        };
        let stored: StoredWaveSpeed = serde_json::from_str(&contents)?;
        Ok(Some(stored.wave_speed_mps))
    }

    fn save(&self, value: f64) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(StoreError::Write)?;
        }
        let contents = serde_json::to_string_pretty(&StoredWaveSpeed {
            wave_speed_mps: value,
        })?;
        std::fs::write(&self.path, contents).map_err(StoreError::Write)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    value: Mutex<Option<f64>>,
}

impl MemoryStore {
    pub fn new(value: Option<f64>) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }
}

impl WaveSpeedStore for MemoryStore {
    fn load(&self) -> Result<Option<f64>, StoreError> {
        Ok(*self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn save(&self, value: f64) -> Result<(), StoreError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }
}

/// Startup load: a missing, unreadable or out-of-range stored value falls back to `default`.
pub fn load_wave_speed(store: &dyn WaveSpeedStore, default: f64) -> f64 {
    match store.load() {
        Ok(Some(value)) => match validate_wave_speed(value) {
            Ok(value) => {
                info!(wave_speed_mps = value, "Loaded persisted wave speed");
                value
            }
            Err(err) => {
                warn!(error = %err, default_mps = default, "Ignoring persisted wave speed");
                default
            }
        },
        Ok(None) => {
            info!(default_mps = default, "No persisted wave speed, using default");
            default
        }
        Err(err) => {
            warn!(error = %err, default_mps = default, "Failed to load wave speed");
            default
        }
    }
}

/// Validate, apply and persist a new wave speed.
///
/// An out-of-range value changes nothing. A store failure is reported after the
/// in-memory value has already been applied.
pub fn apply_wave_speed(
    wave_speed: &WaveSpeed,
    store: &dyn WaveSpeedStore,
    value: f64,
) -> Result<f64, AppError> {
    let applied = wave_speed.set(value)?;
    store.save(applied)?;
    info!(wave_speed_mps = applied, "Wave speed committed");
    Ok(applied)
}
