use thiserror::Error;

use ocp::{ModelDims, OcpError};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LatMpcError {
    #[error("solver is built for N = {solver} but the horizon has N = {horizon}")]
    HorizonMismatch { solver: usize, horizon: usize },

    #[error("solver dimensions {0:?} do not match the lateral model")]
    ModelMismatch(ModelDims),

    #[error("{name} has length {got}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{0} is not finite")]
    NonFinite(&'static str),

    #[error("invalid horizon: {0}")]
    InvalidHorizon(String),

    #[error(transparent)]
    Solver(#[from] OcpError),
}
