use crate::sensor::{BoardBounds, SensorLayout};
use crate::state::{EstimateMethod, ImpactEstimate};
use tracing::debug;

pub mod calibration;
pub mod model;
pub mod tdoa;
pub mod wave_speed;

use model::LocationModel;
use tdoa::{SolverParams, TdoaSolver, reference_channel};

/// Fallback position sits this fraction of the way from the board center to
/// the earliest sensor.
pub const FALLBACK_SENSOR_WEIGHT: f64 = 0.8;

/// TDoA solve with the earliest-sensor fallback.
#[derive(Debug, Clone)]
pub struct TdoaLocator {
    solver: TdoaSolver,
}

impl TdoaLocator {
    pub fn new(layout: SensorLayout, board: BoardBounds, params: SolverParams) -> Self {
        Self {
            solver: TdoaSolver::new(layout, board, params),
        }
    }

    pub fn solver(&self) -> &TdoaSolver {
        &self.solver
    }
}

impl LocationModel for TdoaLocator {
    fn locate(&self, arrivals_us: &[u64], wave_speed_mps: f64) -> ImpactEstimate {
        match self.solver.solve(arrivals_us, wave_speed_mps) {
            Ok(solution) => {
                if solution.clamped {
                    debug!(
                        x = solution.x,
                        y = solution.y,
                        "Solution outside board, clamped"
                    );
                }
                debug!(
                    rms_m = solution.rms_m,
                    iterations = solution.iterations,
                    "TDoA solve converged"
                );
                ImpactEstimate {
                    valid: true,
                    x: solution.x as f32,
                    y: solution.y as f32,
                    method: EstimateMethod::Full,
                    sensors_used: solution.sensors_used,
                }
            }
            Err(err) => {
                debug!(error = %err, "TDoA solve failed, using fallback");
                fallback_estimate(arrivals_us, self.solver.layout(), self.solver.board())
            }
        }
    }
}

/// Earliest-sensor heuristic: "partial" with two or more arrivals, "nearest"
/// with one, "none" when nothing fired.
pub fn fallback_estimate(
    arrivals_us: &[u64],
    layout: &SensorLayout,
    board: &BoardBounds,
) -> ImpactEstimate {
    let arrivals_us = &arrivals_us[..arrivals_us.len().min(layout.len())];
    let have = arrivals_us.iter().filter(|t| **t != 0).count();
    let Some(position) = reference_channel(arrivals_us).and_then(|c| layout.position(c)) else {
        return ImpactEstimate::none(have);
    };

    let (cx, cy) = board.center();
    let (x, y) = board.clamp(
        cx + FALLBACK_SENSOR_WEIGHT * (position.x - cx),
        cy + FALLBACK_SENSOR_WEIGHT * (position.y - cy),
    );
    let method = if have >= 2 {
        EstimateMethod::Partial
    } else {
        EstimateMethod::Nearest
    };

    ImpactEstimate {
        valid: true,
        x: x as f32,
        y: y as f32,
        method,
        sensors_used: have,
    }
}
