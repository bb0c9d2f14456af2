use prelude::flame;
use prelude::nalgebra::dvector;
use prelude::*;

use ocp::{Bound, OcpSolver, OptimizationEngine, RtiEngine, RtiSolver, SolveStatus};

use crate::builder::gen_lat_mpc_spec;
use crate::config::{LatMpcConfig, SolverConfig};
use crate::horizon::Horizon;
use crate::model::{DIMS, HEADING_SPEED_OFFSET, NU, NX};
use crate::LatMpcError;

/// The terminal weight is this fraction of the path/heading block of the stage weight
pub const TERMINAL_WEIGHT_RATIO: float = 3.0 / 20.0;

/// Lateral path tracking MPC driven by one real-time iteration per control cycle.
///
/// The solver keeps its previous iterate as the warm start of the next [`LateralMpc::run`], so
/// the solution depends on the sequence of calls and not only on the latest arguments. Call
/// [`LateralMpc::reset`] to start from scratch.
pub struct LateralMpc<S: OcpSolver = RtiSolver> {
    solver: S,
    horizon: Horizon,
    x_sol: Matrix<Dy, Dy>,
    u_sol: Matrix<Dy, Dy>,
    cost: float,
    status: Option<SolveStatus>,
}

impl LateralMpc<RtiSolver> {
    pub fn new(horizon: Horizon) -> Result<LateralMpc<RtiSolver>, LatMpcError> {
        LateralMpc::with_engine(&RtiEngine, horizon, &SolverConfig::default())
    }

    /// Builds the controller described by `config` and applies its weights.
    pub fn from_config(config: &LatMpcConfig) -> Result<LateralMpc<RtiSolver>, LatMpcError> {
        let horizon = Horizon::lateral_n(config.N)?;
        let mut mpc = LateralMpc::with_engine(&RtiEngine, horizon, &config.solver)?;
        let w = &config.weights;
        mpc.set_weights(w.path, w.heading, w.steer_rate)?;
        Ok(mpc)
    }
}

impl<S: OcpSolver> LateralMpc<S> {
    pub fn with_engine<E>(
        engine: &E,
        horizon: Horizon,
        solver_config: &SolverConfig,
    ) -> Result<LateralMpc<S>, LatMpcError>
    where
        E: OptimizationEngine<Solver = S>,
    {
        let _guard = flame::start_guard("lat mpc build");
        let spec = gen_lat_mpc_spec(&horizon, solver_config);
        let solver = engine.build(spec, horizon.N())?;
        LateralMpc::from_solver(solver, horizon)
    }

    /// Wraps an already built solver, which must have been built for `horizon`.
    pub fn from_solver(solver: S, horizon: Horizon) -> Result<LateralMpc<S>, LatMpcError> {
        if solver.N() != horizon.N() {
            return Err(LatMpcError::HorizonMismatch {
                solver: solver.N(),
                horizon: horizon.N(),
            });
        }
        if solver.dims() != DIMS {
            return Err(LatMpcError::ModelMismatch(solver.dims()));
        }

        let N = horizon.N();
        Ok(LateralMpc {
            solver,
            horizon,
            x_sol: Matrix::<Dy, Dy>::zeros(NX, N + 1),
            u_sol: Matrix::<Dy, Dy>::zeros(NU, N),
            cost: 0.0,
            status: None,
        })
    }

    /// Sets `diag(path, heading, steer_rate)` on stages `0..N` and the scaled path/heading block
    /// on the terminal stage. The weights persist until the next call.
    pub fn set_weights(
        &mut self,
        path_weight: float,
        heading_weight: float,
        steer_rate_weight: float,
    ) -> Result<(), LatMpcError> {
        if !all_finite(&[path_weight, heading_weight, steer_rate_weight]) {
            return Err(LatMpcError::NonFinite("weights"));
        }
        let N = self.horizon.N();

        let W = Matrix::<Dy, Dy>::from_diagonal(&dvector![
            path_weight,
            heading_weight,
            steer_rate_weight
        ]);
        self.solver.set_cost_weight_range(0..N, &W)?;

        let W_e = TERMINAL_WEIGHT_RATIO * W.view((0, 0), (2, 2));
        self.solver.set_cost_weight(N, &W_e)?;

        Ok(())
    }

    /// Runs one solve from the measured state `x0` along the reference `y_pts`/`heading_pts`,
    /// which are sampled at the horizon time offsets.
    ///
    /// Inputs are checked before anything reaches the solver. A degraded solve is returned as
    /// its status, the trajectories then hold whatever iterate the solver kept.
    pub fn run(
        &mut self,
        x0: &[float],
        v_ego: float,
        rotation_radius: float,
        y_pts: &[float],
        heading_pts: &[float],
    ) -> Result<SolveStatus, LatMpcError> {
        let N = self.horizon.N();

        check_len("x0", x0, NX)?;
        check_len("y_pts", y_pts, N + 1)?;
        check_len("heading_pts", heading_pts, N + 1)?;

        check_finite("x0", x0)?;
        check_finite("v_ego", &[v_ego])?;
        check_finite("rotation_radius", &[rotation_radius])?;
        check_finite("y_pts", y_pts)?;
        check_finite("heading_pts", heading_pts)?;

        let _guard = flame::start_guard("lat mpc run");

        let x0 = Vector::<Dy>::from_iterator(NX, x0.iter().cloned());
        self.solver.set_bounds(0, Bound::Lower, &x0)?;
        self.solver.set_bounds(0, Bound::Upper, &x0)?;

        let p = dvector![v_ego, rotation_radius];
        for i in 0..=N {
            self.solver.set_parameter(i, &p)?;
        }

        let heading_scale = v_ego + HEADING_SPEED_OFFSET;
        let yref = Matrix::<Dy, Dy>::from_fn(3, N, |r, i| match r {
            0 => y_pts[i],
            1 => heading_pts[i] * heading_scale,
            _ => 0.0,
        });
        self.solver.set_reference_slice(0, &yref)?;
        let yref_e = dvector![y_pts[N], heading_pts[N] * heading_scale];
        self.solver.set_reference(N, &yref_e)?;

        let status = self.solver.solve();

        self.x_sol = self.solver.state(0..N + 1)?;
        self.u_sol = self.solver.control(0..N)?;
        self.cost = self.solver.cost();
        self.status = Some(status);

        if !status.is_success() {
            warn!("lateral mpc solve degraded: {:?}", status);
        }

        Ok(status)
    }

    /// Drops the warm start and the last solution.
    pub fn reset(&mut self) {
        self.solver.reset();
        self.x_sol.fill(0.0);
        self.u_sol.fill(0.0);
        self.cost = 0.0;
        self.status = None;
    }

    /// States of stages `0..=N`, one column per stage
    pub fn x_sol(&self) -> &Matrix<Dy, Dy> {
        &self.x_sol
    }

    /// Curvature rates of stages `0..N`
    pub fn u_sol(&self) -> &Matrix<Dy, Dy> {
        &self.u_sol
    }

    pub fn cost(&self) -> float {
        self.cost
    }

    /// Status of the last solve, `None` before the first run
    pub fn status(&self) -> Option<SolveStatus> {
        self.status
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }
}

fn check_len(name: &'static str, values: &[float], expected: usize) -> Result<(), LatMpcError> {
    if values.len() != expected {
        return Err(LatMpcError::LengthMismatch {
            name,
            expected,
            got: values.len(),
        });
    }
    Ok(())
}

fn check_finite(name: &'static str, values: &[float]) -> Result<(), LatMpcError> {
    if !all_finite(values) {
        return Err(LatMpcError::NonFinite(name));
    }
    Ok(())
}
