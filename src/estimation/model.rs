//! Location model trait used by the capture controller.

use crate::state::ImpactEstimate;

/// Turns one capture's first arrivals into an impact estimate.
///
/// Implementations never fail: a model that cannot solve must still return an
/// estimate, tagged with the method that produced it.
pub trait LocationModel: Send + Sync + std::fmt::Debug {
    fn locate(&self, arrivals_us: &[u64], wave_speed_mps: f64) -> ImpactEstimate;
}
