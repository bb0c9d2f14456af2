use prelude::nalgebra::dvector;
use prelude::*;

use ocp::{
    HessianApprox, IntegratorType, OcpConstraints, OcpCost, OcpSpec, QpSolver, SolverOptions,
};

use crate::config::SolverConfig;
use crate::horizon::Horizon;
use crate::model::{LateralModel, NP, NY, NY_E};

/// Bound on `psi_ego` in radians
pub const MAX_HEADING: float = 90.0 * PI / 180.0;
/// Bound on `curv_ego`, 50 degrees expressed in radians
pub const MAX_CURVATURE: float = 50.0 * PI / 180.0;

pub fn gen_lat_model() -> LateralModel {
    LateralModel
}

/// Builds the lateral tracking problem over `horizon`.
///
/// Weights and references start at zero and the initial state is a placeholder, all of them are
/// overwritten by the controller every cycle.
pub fn gen_lat_mpc_spec(horizon: &Horizon, solver: &SolverConfig) -> OcpSpec {
    let N = horizon.N();

    let cost = OcpCost {
        W: Matrix::<Dy, Dy>::zeros(NY, NY),
        W_e: Matrix::<Dy, Dy>::zeros(NY_E, NY_E),
        yref: Vector::<Dy>::zeros(NY),
        yref_e: Vector::<Dy>::zeros(NY_E),
    };

    // Heading and curvature stay physically plausible, curv_rate is unbounded
    let constraints = OcpConstraints {
        x0: dvector![0.0, -1.0, 0.0, 0.0],
        idxbx: vec![2, 3],
        lbx: dvector![-MAX_HEADING, -MAX_CURVATURE],
        ubx: dvector![MAX_HEADING, MAX_CURVATURE],
        idxbx_e: vec![2, 3],
        lbx_e: dvector![-MAX_HEADING, -MAX_CURVATURE],
        ubx_e: dvector![MAX_HEADING, MAX_CURVATURE],
    };

    let mut solver_options = SolverOptions {
        hessian_approx: HessianApprox::GaussNewton,
        integrator_type: IntegratorType::Erk,
        qp_solver: QpSolver::Osqp,
        tf: horizon.tf(),
        shooting_nodes: horizon.t_idxs().to_vec(),
        ..SolverOptions::default()
    };
    solver.apply(&mut solver_options);

    OcpSpec {
        model: Box::new(gen_lat_model()),
        N,
        cost,
        constraints,
        parameter_values: Vector::<Dy>::zeros(NP),
        solver_options,
    }
}
