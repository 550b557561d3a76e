//! Synthetic strikes for tests and bench runs without hardware.

use crate::capture::CaptureState;
use crate::sensor::{ChannelId, SensorLayout, SensorPosition};

/// Reference board: four sensors in a diamond around (0.2, 0.2) on a 0.4 m board.
pub const DIAMOND_POSITIONS: [SensorPosition; 4] = [
    SensorPosition { x: 0.2, y: 0.1 },
    SensorPosition { x: 0.2, y: 0.3 },
    SensorPosition { x: 0.3, y: 0.2 },
    SensorPosition { x: 0.1, y: 0.2 },
];

pub fn diamond_layout() -> SensorLayout {
    SensorLayout {
        positions: DIAMOND_POSITIONS.to_vec(),
    }
}

/// First-arrival timestamps (µs) for a strike at `(x, y)` starting at `strike_us`.
pub fn arrival_times(
    layout: &SensorLayout,
    x: f64,
    y: f64,
    wave_speed_mps: f64,
    strike_us: u64,
) -> Vec<u64> {
    layout
        .positions()
        .iter()
        .map(|p| {
            let travel_us = (p.distance_to(x, y) / wave_speed_mps * 1e6).round() as u64;
            strike_us.max(1) + travel_us
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StrikeOptions {
    /// Extra edges per channel after the first arrival, spaced `ringing_period_us` apart.
    pub ringing_edges: u32,
    pub ringing_period_us: u64,
}

/// Feed a strike's edges into the capture latch in time order. Channels with a
/// zero arrival stay silent.
pub fn inject_strike(state: &CaptureState, arrivals_us: &[u64], options: StrikeOptions) {
    let mut edges: Vec<(u64, ChannelId)> = Vec::new();
    for (channel, first) in arrivals_us.iter().enumerate() {
        if *first == 0 {
            continue;
        }
        edges.push((*first, channel));
        for n in 1..=u64::from(options.ringing_edges) {
            edges.push((first + n * options.ringing_period_us, channel));
        }
    }
    edges.sort_unstable();
    for (timestamp_us, channel) in edges {
        state.on_edge(channel, timestamp_us);
    }
}
