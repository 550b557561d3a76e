use crate::error::AppError;
use serde::{Deserialize, Serialize};

pub mod mock;

pub type ChannelId = usize;

/// The hit mask is a `u32`, one bit per channel.
pub const MAX_CHANNELS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolarity {
    Rising,
    Falling,
    #[default]
    Both,
}

/// Sensor position on the board, in meters, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SensorPosition {
    pub x: f64,
    pub y: f64,
}

impl SensorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (x - self.x).hypot(y - self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub channel: ChannelId,
    pub gpio_pin: u8,
    pub position: SensorPosition,
}

/// Fixed sensor geometry, indexed by channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLayout {
    positions: Vec<SensorPosition>,
}

impl SensorLayout {
    pub fn new(positions: Vec<SensorPosition>) -> Result<Self, AppError> {
        if positions.is_empty() {
            return Err(AppError::Layout("at least one sensor is required".to_string()));
        }
        if positions.len() > MAX_CHANNELS {
            return Err(AppError::Layout(format!(
                "{} sensors configured, at most {MAX_CHANNELS} supported",
                positions.len()
            )));
        }
        if positions
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(AppError::Layout("sensor positions must be finite".to_string()));
        }
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, channel: ChannelId) -> Option<SensorPosition> {
        self.positions.get(channel).copied()
    }

    pub fn positions(&self) -> &[SensorPosition] {
        &self.positions
    }

    /// Mean of all configured sensor positions.
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.positions.len().max(1) as f64;
        let (sx, sy) = self
            .positions
            .iter()
            .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
        (sx / n, sy / n)
    }
}

/// Physical board rectangle in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoardBounds {
    pub fn square(size_m: f64) -> Self {
        Self {
            min_x: 0.0,
            max_x: size_m,
            min_y: 0.0,
            max_y: size_m,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x.clamp(self.min_x, self.max_x),
            y.clamp(self.min_y, self.max_y),
        )
    }
}

/// Pair GPIO pins with positions in channel order.
pub fn build_sensor_configs(
    gpio_pins: &[u8],
    positions: &[SensorPosition],
) -> Result<Vec<SensorConfig>, AppError> {
    if gpio_pins.len() != positions.len() {
        return Err(AppError::Layout(format!(
            "{} pins but {} positions configured",
            gpio_pins.len(),
            positions.len()
        )));
    }
    if gpio_pins.len() > MAX_CHANNELS {
        return Err(AppError::Layout(format!(
            "at most {MAX_CHANNELS} sensors supported"
        )));
    }

    Ok(gpio_pins
        .iter()
        .zip(positions)
        .enumerate()
        .map(|(channel, (pin, position))| SensorConfig {
            channel,
            gpio_pin: *pin,
            position: *position,
        })
        .collect())
}
