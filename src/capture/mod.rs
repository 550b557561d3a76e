//! Edge latching shared between interrupt contexts and the capture loop.
//!
//! All per-channel state lives in one [`CaptureState`]. Interrupt handlers
//! call [`CaptureState::on_edge`]; the controller drives the window phases.
//! Every access goes through a single short critical section and never
//! allocates on the edge path.

use crate::sensor::{ChannelId, MAX_CHANNELS};
use std::sync::{Mutex, PoisonError};

pub mod clock;
pub mod controller;

pub use clock::{Clock, ManualClock, MonotonicClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    PendingOpen,
    Capturing,
    Deadtime,
}

#[derive(Debug)]
struct Latch {
    phase: CapturePhase,
    trigger: ChannelId,
    t0_us: u64,
    hit_mask: u32,
    first_arrival_us: Vec<u64>,
    last_edge_us: Vec<u64>,
    edge_count: Vec<u32>,
    closed_at_ms: u64,
}

impl Latch {
    fn clear_channels(&mut self) {
        self.hit_mask = 0;
        self.first_arrival_us.fill(0);
        self.last_edge_us.fill(0);
        self.edge_count.fill(0);
    }
}

/// Per-capture copy of the latched arrivals and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub trigger: ChannelId,
    pub t0_us: u64,
    pub hit_mask: u32,
    /// First arrival per channel in µs, 0 when the channel did not fire.
    pub first_arrival_us: Vec<u64>,
    pub last_edge_us: Vec<u64>,
    pub edge_count: Vec<u32>,
}

impl CaptureSnapshot {
    pub fn channel_count(&self) -> usize {
        self.first_arrival_us.len()
    }

    pub fn latched_count(&self) -> usize {
        self.first_arrival_us.iter().filter(|t| **t != 0).count()
    }

    pub fn is_latched(&self, channel: ChannelId) -> bool {
        self.hit_mask & (1u32 << channel) != 0
    }

    pub fn relative_first_us(&self, channel: ChannelId) -> Option<i64> {
        relative_to(self.first_arrival_us.get(channel).copied(), self.t0_us)
    }

    pub fn relative_last_us(&self, channel: ChannelId) -> Option<i64> {
        relative_to(self.last_edge_us.get(channel).copied(), self.t0_us)
    }
}

fn relative_to(timestamp_us: Option<u64>, t0_us: u64) -> Option<i64> {
    match timestamp_us {
        Some(t) if t != 0 => Some(t as i64 - t0_us as i64),
        _ => None,
    }
}

/// Live per-channel edge diagnostics, independent of window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDiagnostics {
    pub edge_count: Vec<u32>,
    pub last_edge_us: Vec<u64>,
}

#[derive(Debug)]
pub struct CaptureState {
    channels: usize,
    latch: Mutex<Latch>,
}

impl CaptureState {
    /// Channel storage is sized once here; `channels` is capped at [`MAX_CHANNELS`].
    pub fn new(channels: usize) -> Self {
        let channels = channels.min(MAX_CHANNELS);
        Self {
            channels,
            latch: Mutex::new(Latch {
                phase: CapturePhase::Idle,
                trigger: 0,
                t0_us: 0,
                hit_mask: 0,
                first_arrival_us: vec![0; channels],
                last_edge_us: vec![0; channels],
                edge_count: vec![0; channels],
                closed_at_ms: 0,
            }),
        }
    }

    fn critical<R>(&self, f: impl FnOnce(&mut Latch) -> R) -> R {
        let mut guard = self.latch.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Record an edge on `channel` at `timestamp_us`. Safe to call from any
    /// edge context at any time.
    pub fn on_edge(&self, channel: ChannelId, timestamp_us: u64) {
        if channel >= self.channels {
            return;
        }
        self.critical(|latch| {
            latch.edge_count[channel] = latch.edge_count[channel].saturating_add(1);
            latch.last_edge_us[channel] = timestamp_us;

            if latch.phase == CapturePhase::Idle {
                latch.phase = CapturePhase::PendingOpen;
                latch.trigger = channel;
                latch.t0_us = timestamp_us;
            }

            if matches!(
                latch.phase,
                CapturePhase::PendingOpen | CapturePhase::Capturing
            ) {
                let bit = 1u32 << channel;
                if latch.hit_mask & bit == 0 {
                    latch.hit_mask |= bit;
                    latch.first_arrival_us[channel] = timestamp_us;
                }
            }
        });
    }

    pub fn phase(&self) -> CapturePhase {
        self.critical(|latch| latch.phase)
    }

    pub fn hit_mask(&self) -> u32 {
        self.critical(|latch| latch.hit_mask)
    }

    pub fn diagnostics(&self) -> ChannelDiagnostics {
        self.critical(|latch| ChannelDiagnostics {
            edge_count: latch.edge_count.clone(),
            last_edge_us: latch.last_edge_us.clone(),
        })
    }

    /// PendingOpen → Capturing. Returns the trigger channel and t0.
    pub(crate) fn open_pending(&self) -> Option<(ChannelId, u64)> {
        self.critical(|latch| {
            if latch.phase != CapturePhase::PendingOpen {
                return None;
            }
            latch.edge_count.fill(0);
            latch.last_edge_us.fill(0);
            let bit = 1u32 << latch.trigger;
            if latch.hit_mask & bit == 0 {
                latch.hit_mask |= bit;
                latch.first_arrival_us[latch.trigger] = latch.t0_us;
            }
            latch.phase = CapturePhase::Capturing;
            Some((latch.trigger, latch.t0_us))
        })
    }

    /// Capturing → Deadtime once `window_us` has elapsed since t0.
    pub(crate) fn close_if_elapsed(
        &self,
        now_us: u64,
        window_us: u64,
        now_ms: u64,
    ) -> Option<CaptureSnapshot> {
        self.critical(|latch| {
            if latch.phase != CapturePhase::Capturing
                || now_us.saturating_sub(latch.t0_us) < window_us
            {
                return None;
            }
            let mask = latch.hit_mask;
            // Only arrivals whose mask bit is set belong to this cycle.
            let first_arrival_us = latch
                .first_arrival_us
                .iter()
                .enumerate()
                .map(|(i, t)| if mask & (1u32 << i) != 0 { *t } else { 0 })
                .collect();
            let snapshot = CaptureSnapshot {
                trigger: latch.trigger,
                t0_us: latch.t0_us,
                hit_mask: mask,
                first_arrival_us,
                last_edge_us: latch.last_edge_us.clone(),
                edge_count: latch.edge_count.clone(),
            };
            latch.phase = CapturePhase::Deadtime;
            latch.closed_at_ms = now_ms;
            Some(snapshot)
        })
    }

    /// Deadtime → Idle once `deadtime_ms` has elapsed since the window closed.
    pub(crate) fn rearm_if_elapsed(&self, now_ms: u64, deadtime_ms: u64) -> bool {
        self.critical(|latch| {
            if latch.phase != CapturePhase::Deadtime
                || now_ms.saturating_sub(latch.closed_at_ms) < deadtime_ms
            {
                return false;
            }
            latch.clear_channels();
            latch.t0_us = 0;
            latch.phase = CapturePhase::Idle;
            true
        })
    }
}
