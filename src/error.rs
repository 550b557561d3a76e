use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid sensor channel: {0}")]
    InvalidChannel(usize),
    #[error("sensor layout error: {0}")]
    Layout(String),
    #[error("wave speed out of range: {0} m/s")]
    InvalidCalibrationInput(f64),
    #[error("wave speed store error: {0}")]
    Store(#[from] crate::estimation::wave_speed::StoreError),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("state lock poisoned")]
    StateLock,
}
