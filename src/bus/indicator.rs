#[cfg(target_os = "linux")]
use crate::error::AppError;
use tracing::debug;

/// Signals window open/re-arm to the operator, typically a status LED.
pub trait CaptureIndicator: Send {
    fn capture_started(&mut self);
    fn rearmed(&mut self);
}

/// Indicator for hosts without an LED; transitions are only logged.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl CaptureIndicator for LogIndicator {
    fn capture_started(&mut self) {
        debug!("Capture indicator on");
    }

    fn rearmed(&mut self) {
        debug!("Capture indicator off");
    }
}

#[cfg(target_os = "linux")]
pub struct RppalIndicator {
    pin: rppal::gpio::OutputPin,
}

#[cfg(target_os = "linux")]
impl RppalIndicator {
    pub fn new(pin: u8) -> Result<Self, AppError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
        let pin = gpio
            .get(pin)
            .map_err(|err| AppError::Gpio(err.to_string()))?
            .into_output_low();
        Ok(Self { pin })
    }
}

#[cfg(target_os = "linux")]
impl CaptureIndicator for RppalIndicator {
    fn capture_started(&mut self) {
        self.pin.set_high();
    }

    fn rearmed(&mut self) {
        self.pin.set_low();
    }
}

/// GPIO indicator when a pin is configured and available, log-only otherwise.
pub fn create_indicator(pin: Option<u8>) -> Box<dyn CaptureIndicator> {
    #[cfg(target_os = "linux")]
    {
        if let Some(pin) = pin {
            match RppalIndicator::new(pin) {
                Ok(indicator) => return Box::new(indicator),
                Err(err) => {
                    tracing::warn!(pin, error = %err, "Failed to open indicator pin, logging only");
                }
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pin;
    }

    Box::new(LogIndicator)
}
