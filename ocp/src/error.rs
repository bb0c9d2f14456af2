use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OcpError {
    #[error("stage {stage} out of range, the solver has stages 0..={last}")]
    StageOutOfRange { stage: usize, last: usize },

    #[error("{field} at stage {stage} has shape {got:?}, expected {expected:?}")]
    DimensionMismatch {
        field: &'static str,
        stage: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("{field} at stage {stage} contains non-finite values")]
    NonFinite { field: &'static str, stage: usize },

    #[error("invalid problem: {0}")]
    InvalidSpec(String),

    #[error("problem has N = {spec}, but a solver with N = {requested} was requested")]
    HorizonMismatch { spec: usize, requested: usize },

    #[error("QP setup failed: {0}")]
    QpSetup(String),
}
