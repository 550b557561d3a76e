//! Damped Gauss-Newton TDoA solver.
//!
//! Residual for each non-reference sensor `i`:
//! `r_i = (|p - s_i| - |p - s_ref|) - v * (t_i - t_ref)`

use crate::sensor::{BoardBounds, SensorLayout, SensorPosition};
use serde::Deserialize;
use thiserror::Error;

pub const MIN_SENSORS: usize = 3;

const MIN_DISTANCE_M: f64 = 1e-9;
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Solver tunables, loaded from `[solver]` in the config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub max_iterations: usize,
    /// Levenberg term added to the normal-matrix diagonal.
    pub damping: f64,
    pub max_step_m: f64,
    pub convergence_m: f64,
    pub rms_threshold_m: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            damping: 1e-6,
            max_step_m: 0.05,
            convergence_m: 1e-4,
            rms_threshold_m: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("insufficient arrivals: {have} of {} required", MIN_SENSORS)]
    InsufficientData { have: usize },
    #[error("normal matrix is singular")]
    SingularSystem,
    #[error("poor fit: rms residual {rms_m:.4} m")]
    PoorFit { rms_m: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TdoaSolution {
    pub x: f64,
    pub y: f64,
    pub rms_m: f64,
    pub iterations: usize,
    pub sensors_used: usize,
    /// True when the unconstrained optimum fell outside the board.
    pub clamped: bool,
}

/// Earliest nonzero arrival; ties resolve to the lowest channel.
pub fn reference_channel(arrivals_us: &[u64]) -> Option<usize> {
    arrivals_us
        .iter()
        .enumerate()
        .filter(|(_, t)| **t != 0)
        .min_by_key(|(_, t)| **t)
        .map(|(channel, _)| channel)
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    position: SensorPosition,
    range_difference_m: f64,
}

#[derive(Debug, Clone)]
pub struct TdoaSolver {
    layout: SensorLayout,
    board: BoardBounds,
    params: SolverParams,
}

impl TdoaSolver {
    pub fn new(layout: SensorLayout, board: BoardBounds, params: SolverParams) -> Self {
        Self {
            layout,
            board,
            params,
        }
    }

    pub fn layout(&self) -> &SensorLayout {
        &self.layout
    }

    pub fn board(&self) -> &BoardBounds {
        &self.board
    }

    /// Solve for the impact position from per-channel first arrivals (µs, 0 = none).
    pub fn solve(&self, arrivals_us: &[u64], wave_speed_mps: f64) -> Result<TdoaSolution, SolveError> {
        let arrivals_us = &arrivals_us[..arrivals_us.len().min(self.layout.len())];
        let have = arrivals_us.iter().filter(|t| **t != 0).count();
        if have < MIN_SENSORS {
            return Err(SolveError::InsufficientData { have });
        }

        let (reference, reference_position) = reference_channel(arrivals_us)
            .and_then(|channel| Some((channel, self.layout.position(channel)?)))
            .ok_or(SolveError::InsufficientData { have })?;
        let t_ref = arrivals_us[reference];

        let observations: Vec<Observation> = arrivals_us
            .iter()
            .enumerate()
            .filter(|(channel, t)| *channel != reference && **t != 0)
            .filter_map(|(channel, t)| {
                let dt_us = *t as f64 - t_ref as f64;
                Some(Observation {
                    position: self.layout.position(channel)?,
                    range_difference_m: wave_speed_mps * dt_us * 1e-6,
                })
            })
            .collect();

        let (mut x, mut y) = self.layout.centroid();
        let mut iterations = 0;

        for _ in 0..self.params.max_iterations {
            iterations += 1;
            let dxr = x - reference_position.x;
            let dyr = y - reference_position.y;
            let dr = dxr.hypot(dyr).max(MIN_DISTANCE_M);

            let (mut a00, mut a01, mut a11) = (0.0, 0.0, 0.0);
            let (mut g0, mut g1) = (0.0, 0.0);
            for obs in &observations {
                let dxi = x - obs.position.x;
                let dyi = y - obs.position.y;
                let di = dxi.hypot(dyi).max(MIN_DISTANCE_M);

                let residual = (di - dr) - obs.range_difference_m;
                let jx = dxi / di - dxr / dr;
                let jy = dyi / di - dyr / dr;

                a00 += jx * jx;
                a01 += jx * jy;
                a11 += jy * jy;
                g0 += jx * residual;
                g1 += jy * residual;
            }

            a00 += self.params.damping;
            a11 += self.params.damping;
            let det = a00 * a11 - a01 * a01;
            if !det.is_finite() || det.abs() < SINGULAR_DETERMINANT {
                return Err(SolveError::SingularSystem);
            }

            // (JᵀJ + λI) δ = -Jᵀr
            let mut dx = -(a11 * g0 - a01 * g1) / det;
            let mut dy = -(a00 * g1 - a01 * g0) / det;

            let step = dx.hypot(dy);
            if step > self.params.max_step_m {
                let scale = self.params.max_step_m / step;
                dx *= scale;
                dy *= scale;
            }

            x += dx;
            y += dy;

            if dx.hypot(dy) < self.params.convergence_m {
                break;
            }
        }

        let rms_m = rms_residual(x, y, reference_position, &observations);
        if !rms_m.is_finite() || rms_m > self.params.rms_threshold_m {
            return Err(SolveError::PoorFit { rms_m });
        }

        let clamped = !self.board.contains(x, y);
        let (x, y) = self.board.clamp(x, y);
        Ok(TdoaSolution {
            x,
            y,
            rms_m,
            iterations,
            sensors_used: have,
            clamped,
        })
    }
}

fn rms_residual(
    x: f64,
    y: f64,
    reference_position: SensorPosition,
    observations: &[Observation],
) -> f64 {
    if observations.is_empty() {
        return 0.0;
    }
    let dr = reference_position.distance_to(x, y).max(MIN_DISTANCE_M);
    let sum_sq: f64 = observations
        .iter()
        .map(|obs| {
            let di = obs.position.distance_to(x, y).max(MIN_DISTANCE_M);
            let residual = (di - dr) - obs.range_difference_m;
            residual * residual
        })
        .sum();
    (sum_sq / observations.len() as f64).sqrt()
}
