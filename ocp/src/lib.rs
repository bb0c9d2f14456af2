//! Optimal control problems with a nonlinear least squares cost, solved by Gauss-Newton SQP
//! with OSQP as the QP solver.
//!
//! In real-time iteration mode every call to [`OcpSolver::solve`] performs exactly one SQP
//! iteration warm started from the previous iterate, so consecutive calls refine the same
//! trajectory as the inputs change.
#![allow(non_snake_case)]

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate approx;

use std::ops::Range;
use std::time::Duration;

use prelude::*;

mod error;
pub use error::OcpError;

pub mod erk;

mod model;
pub use model::{discretise_sparsity, ModelDims, OcpModel};

mod qp;

mod rti;
pub use rti::{RtiEngine, RtiSolver};

mod spec;
pub use spec::{
    ConstraintDescription, CostDescription, HessianApprox, IntegratorType, NlpSolverType,
    OcpConstraints, OcpCost, OcpDescription, OcpSpec, QpSolver, SolverOptions,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Success,
    /// The QP stopped early, the step was still applied
    QpInaccurate,
    /// SQP iteration limit reached before convergence
    MaxIterations,
    /// Infeasible or non-convex QP, or inconsistent bounds. The iterate is unchanged.
    QpFailure,
    /// The step or the linearisation was not finite. The iterate is unchanged.
    NanDetected,
}

impl SolveStatus {
    pub fn is_success(self) -> bool {
        self == SolveStatus::Success
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveStats {
    pub sqp_iter: usize,
    pub qp_iter: usize,
    pub time: Duration,
}

/// A built solver for a fixed horizon of `N` shooting intervals.
///
/// Stages are numbered `0..=N`, stage `N` being the terminal stage. Every setter checks the
/// stage and the dimensions of its argument and leaves the solver untouched on error.
pub trait OcpSolver {
    fn N(&self) -> usize;

    fn dims(&self) -> ModelDims;

    fn set_bounds(&mut self, stage: usize, bound: Bound, value: &Vector<Dy>)
        -> Result<(), OcpError>;

    fn bounds(&self, stage: usize, bound: Bound) -> Result<&Vector<Dy>, OcpError>;

    fn set_parameter(&mut self, stage: usize, value: &Vector<Dy>) -> Result<(), OcpError>;

    fn parameter(&self, stage: usize) -> Result<&Vector<Dy>, OcpError>;

    fn set_cost_weight(&mut self, stage: usize, W: &Matrix<Dy, Dy>) -> Result<(), OcpError>;

    fn cost_weight(&self, stage: usize) -> Result<&Matrix<Dy, Dy>, OcpError>;

    fn set_reference(&mut self, stage: usize, yref: &Vector<Dy>) -> Result<(), OcpError>;

    fn reference(&self, stage: usize) -> Result<&Vector<Dy>, OcpError>;

    fn solve(&mut self) -> SolveStatus;

    /// States of the given stages, one column per stage
    fn state(&self, stages: Range<usize>) -> Result<Matrix<Dy, Dy>, OcpError>;

    /// Controls of the given stages, one column per stage
    fn control(&self, stages: Range<usize>) -> Result<Matrix<Dy, Dy>, OcpError>;

    fn cost(&self) -> float;

    fn stats(&self) -> SolveStats;

    /// Discards the warm start, the next solve starts from a zero iterate.
    fn reset(&mut self);

    fn set_cost_weight_range(
        &mut self,
        stages: Range<usize>,
        W: &Matrix<Dy, Dy>,
    ) -> Result<(), OcpError> {
        check_range(stages.clone(), self.N() + 1)?;
        for stage in stages {
            self.set_cost_weight(stage, W)?;
        }
        Ok(())
    }

    /// Sets the references of consecutive stages from the columns of `yrefs`, starting at `start`.
    fn set_reference_slice(&mut self, start: usize, yrefs: &Matrix<Dy, Dy>) -> Result<(), OcpError> {
        check_range(start..start + yrefs.ncols(), self.N() + 1)?;
        for (k, yref) in yrefs.column_iter().enumerate() {
            self.set_reference(start + k, &yref.into_owned())?;
        }
        Ok(())
    }
}

pub(crate) fn check_range(stages: Range<usize>, len: usize) -> Result<(), OcpError> {
    if stages.start > stages.end || stages.end > len {
        return Err(OcpError::StageOutOfRange {
            stage: stages.start.max(stages.end.saturating_sub(1)),
            last: len.saturating_sub(1),
        });
    }
    Ok(())
}

pub trait OptimizationEngine {
    type Solver: OcpSolver;

    /// Validates `spec` and builds a solver for a horizon of `N` shooting intervals.
    fn build(&self, spec: OcpSpec, N: usize) -> Result<Self::Solver, OcpError>;
}
