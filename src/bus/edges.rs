use crate::capture::CaptureState;
use crate::sensor::ChannelId;
use std::time::Duration;

#[cfg(target_os = "linux")]
use crate::error::AppError;
#[cfg(target_os = "linux")]
use crate::sensor::{EdgePolarity, SensorConfig};
#[cfg(target_os = "linux")]
use std::sync::Arc;
#[cfg(target_os = "linux")]
use tracing::info;

/// Capability handed to edge sources: one call per detected edge, stamped by
/// the source on the `CLOCK_MONOTONIC` time line in microseconds.
pub trait EdgeSink: Send + Sync {
    fn on_edge_at(&self, channel: ChannelId, timestamp_us: u64);
}

impl EdgeSink for CaptureState {
    fn on_edge_at(&self, channel: ChannelId, timestamp_us: u64) {
        self.on_edge(channel, timestamp_us);
    }
}

/// Kernel event timestamp to capture microseconds. Never zero.
pub fn event_timestamp_us(timestamp: Duration) -> u64 {
    u64::try_from(timestamp.as_micros())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// Interrupt bindings for the sensor lines. Dropping this detaches them.
#[cfg(target_os = "linux")]
pub struct RppalEdgeInputs {
    pins: Vec<rppal::gpio::InputPin>,
}

#[cfg(target_os = "linux")]
impl RppalEdgeInputs {
    pub fn new(
        sensors: &[SensorConfig],
        polarity: EdgePolarity,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<Self, AppError> {
        use rppal::gpio::{Gpio, Trigger};

        let gpio = Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
        let trigger = match polarity {
            EdgePolarity::Rising => Trigger::RisingEdge,
            EdgePolarity::Falling => Trigger::FallingEdge,
            EdgePolarity::Both => Trigger::Both,
        };

        let mut pins = Vec::with_capacity(sensors.len());
        for sensor in sensors {
            let mut pin = gpio
                .get(sensor.gpio_pin)
                .map_err(|err| AppError::Gpio(err.to_string()))?
                .into_input();
            let channel = sensor.channel;
            let sink = Arc::clone(&sink);
            pin.set_async_interrupt(trigger, None, move |event| {
                sink.on_edge_at(channel, event_timestamp_us(event.timestamp))
            })
                .map_err(|err| AppError::Gpio(err.to_string()))?;
            info!(
                channel,
                gpio_pin = sensor.gpio_pin,
                polarity = ?polarity,
                "Edge interrupt attached"
            );
            pins.push(pin);
        }

        Ok(Self { pins })
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
