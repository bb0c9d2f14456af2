use prelude::*;

use crate::LatMpcError;

/// Number of points in the model horizon
pub const IDX_N: usize = 33;
/// Shooting intervals of the lateral MPC in the reference configuration
pub const LAT_MPC_N: usize = 16;
/// Time of the last model horizon point in seconds
pub const MAX_HORIZON_TIME: float = 10.0;

/// Quadratic spacing, finer near the vehicle and coarser further out.
pub fn index_function(idx: float, max_val: float, max_idx: float) -> float {
    max_val * (idx / max_idx).powi(2)
}

/// Strictly increasing time offsets of the horizon stages, `N + 1` of them.
#[derive(Clone, Debug, PartialEq)]
pub struct Horizon {
    t_idxs: Vec<float>,
}

impl Horizon {
    pub fn new(t_idxs: Vec<float>) -> Result<Horizon, LatMpcError> {
        if t_idxs.len() < 2 {
            return Err(LatMpcError::InvalidHorizon(format!(
                "need at least 2 time offsets, got {}",
                t_idxs.len()
            )));
        }
        if !all_finite(&t_idxs) {
            return Err(LatMpcError::InvalidHorizon(
                "time offsets must be finite".to_string(),
            ));
        }
        if let Some(i) = (1..t_idxs.len()).find(|&i| t_idxs[i] <= t_idxs[i - 1]) {
            return Err(LatMpcError::InvalidHorizon(format!(
                "time offsets must be strictly increasing, t[{}] = {} follows {}",
                i,
                t_idxs[i],
                t_idxs[i - 1]
            )));
        }
        Ok(Horizon { t_idxs })
    }

    /// The `IDX_N` point horizon shared with the rest of the planning stack.
    pub fn model() -> Horizon {
        let max_idx = (IDX_N - 1) as float;
        Horizon {
            t_idxs: (0..IDX_N)
                .map(|i| index_function(i as float, MAX_HORIZON_TIME, max_idx))
                .collect(),
        }
    }

    /// The first `LAT_MPC_N + 1` points of the model horizon.
    pub fn lateral() -> Horizon {
        let mut horizon = Horizon::model();
        horizon.t_idxs.truncate(LAT_MPC_N + 1);
        horizon
    }

    /// The first `N + 1` points of the model horizon.
    pub fn lateral_n(N: usize) -> Result<Horizon, LatMpcError> {
        if N == 0 || N >= IDX_N {
            return Err(LatMpcError::InvalidHorizon(format!(
                "N must be in 1..={}, got {}",
                IDX_N - 1,
                N
            )));
        }
        let mut horizon = Horizon::model();
        horizon.t_idxs.truncate(N + 1);
        Ok(horizon)
    }

    pub fn N(&self) -> usize {
        self.t_idxs.len() - 1
    }

    pub fn t_idxs(&self) -> &[float] {
        &self.t_idxs
    }

    pub fn tf(&self) -> float {
        self.t_idxs[self.N()] - self.t_idxs[0]
    }

    /// Stage durations
    pub fn dt(&self) -> Vec<float> {
        self.t_idxs.windows(2).map(|w| w[1] - w[0]).collect()
    }
}
