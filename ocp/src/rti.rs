use std::ops::Range;
use std::time::Instant;

use prelude::flame;
use prelude::*;

use crate::erk::integrate_with_sensitivities;
use crate::qp::{OsqpQp, QpOutcome, QpStage};
use crate::{
    check_range, discretise_sparsity, Bound, ModelDims, NlpSolverType, OcpError, OcpModel,
    OcpSolver, OcpSpec, OptimizationEngine, SolveStats, SolveStatus, SolverOptions,
};

/// Builds [`RtiSolver`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct RtiEngine;

impl OptimizationEngine for RtiEngine {
    type Solver = RtiSolver;

    fn build(&self, spec: OcpSpec, N: usize) -> Result<RtiSolver, OcpError> {
        let _guard = flame::start_guard("rti build");
        spec.validate()?;
        if spec.N != N {
            return Err(OcpError::HorizonMismatch {
                spec: spec.N,
                requested: N,
            });
        }
        RtiSolver::new(spec)
    }
}

/// Gauss-Newton SQP solver over a multiple shooting discretisation.
///
/// The iterate persists between calls to [`OcpSolver::solve`] and is the linearisation point of
/// the next QP, so results depend on the call history until [`OcpSolver::reset`] is called.
pub struct RtiSolver {
    model: Box<dyn OcpModel>,
    dims: ModelDims,
    N: usize,
    dt: Vec<float>,
    options: SolverOptions,
    qp: OsqpQp,
    // Per stage data for stages 0..=N
    idxb: Vec<Vec<usize>>,
    lbx: Vec<Vector<Dy>>,
    ubx: Vec<Vector<Dy>>,
    p: Vec<Vector<Dy>>,
    W: Vec<Matrix<Dy, Dy>>,
    yref: Vec<Vector<Dy>>,
    // Current iterate
    x: Matrix<Dy, Dy>,
    u: Matrix<Dy, Dy>,
    cost: float,
    stats: SolveStats,
}

struct Step {
    norm: float,
    accurate: bool,
}

impl RtiSolver {
    fn new(spec: OcpSpec) -> Result<RtiSolver, OcpError> {
        let OcpSpec {
            model,
            N,
            cost,
            constraints: c,
            parameter_values,
            solver_options,
        } = spec;
        let dims = model.dims();
        let ModelDims { nx, nu, .. } = dims;

        // Some components of A and B will always be zero and can be excluded from the sparse
        // constraint matrix
        let (A_sparsity, B_sparsity) = model.linearise_sparsity();
        if A_sparsity.shape() != (nx, nx) || B_sparsity.shape() != (nx, nu) {
            return Err(OcpError::InvalidSpec(format!(
                "model sparsity has shapes {:?} and {:?}",
                A_sparsity.shape(),
                B_sparsity.shape()
            )));
        }
        let (A_d_sparsity, B_d_sparsity) = discretise_sparsity(&A_sparsity, &B_sparsity);

        let mut idxb = vec![(0..nx).collect::<Vec<_>>()];
        idxb.extend((1..N).map(|_| c.idxbx.clone()));
        idxb.push(c.idxbx_e.clone());

        let stagewise = |first: &Vector<Dy>, mid: &Vector<Dy>, last: &Vector<Dy>| {
            let mut v = vec![first.clone()];
            v.extend((1..N).map(|_| mid.clone()));
            v.push(last.clone());
            v
        };
        let lbx = stagewise(&c.x0, &c.lbx, &c.lbx_e);
        let ubx = stagewise(&c.x0, &c.ubx, &c.ubx_e);

        let mut W = vec![cost.W.clone(); N];
        W.push(cost.W_e.clone());
        let mut yref = vec![cost.yref.clone(); N];
        yref.push(cost.yref_e.clone());

        let qp = {
            let _guard = flame::start_guard("rti qp create");
            OsqpQp::new(dims, N, &A_d_sparsity, &B_d_sparsity, &idxb, &solver_options)?
        };

        info!(
            "built {:?} solver for '{}' with N = {} and {} QP variables",
            solver_options.nlp_solver_type,
            model.name(),
            N,
            qp.num_variables()
        );

        Ok(RtiSolver {
            dims,
            N,
            dt: solver_options.time_steps(),
            qp,
            idxb,
            lbx,
            ubx,
            p: vec![parameter_values; N + 1],
            W,
            yref,
            x: Matrix::<Dy, Dy>::zeros(nx, N + 1),
            u: Matrix::<Dy, Dy>::zeros(nu, N),
            cost: 0.0,
            stats: SolveStats::default(),
            model,
            options: solver_options,
        })
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn check_stage(&self, stage: usize) -> Result<(), OcpError> {
        if stage > self.N {
            return Err(OcpError::StageOutOfRange {
                stage,
                last: self.N,
            });
        }
        Ok(())
    }

    fn sqp_step(&mut self, qp_iter: &mut usize) -> Result<Step, SolveStatus> {
        let ModelDims { nx, nu, .. } = self.dims;
        let N = self.N;
        let num_steps = self.options.sim_method_num_steps;

        let guard = flame::start_guard("rti linearise");
        for i in 0..N {
            let x_i = self.x.column(i).into_owned();
            let u_i = self.u.column(i).into_owned();
            let p_i = &self.p[i];

            let sens =
                integrate_with_sensitivities(&*self.model, self.dt[i], num_steps, &x_i, &u_i, p_i);
            let defect = &sens.x_next - self.x.column(i + 1);

            // Gauss-Newton: H = Jᵀ W J, g = Jᵀ W r
            let r = self.model.cost_y(&x_i, &u_i, p_i) - &self.yref[i];
            let (Jx, Ju) = self.model.cost_y_jacobian(&x_i, &u_i, p_i);
            let W = &self.W[i];
            let WJx = W * &Jx;
            let WJu = W * &Ju;
            let Wr = W * &r;
            let Hxx = Jx.transpose() * &WJx;
            let Hxu = Jx.transpose() * &WJu;
            let Huu = Ju.transpose() * &WJu;
            let gx = Jx.transpose() * &Wr;
            let gu = Ju.transpose() * &Wr;

            let finite = all_finite(
                sens.A
                    .iter()
                    .chain(sens.B.iter())
                    .chain(defect.iter())
                    .chain(Hxx.iter())
                    .chain(Hxu.iter())
                    .chain(Huu.iter())
                    .chain(gx.iter())
                    .chain(gu.iter()),
            );
            if !finite {
                warn!("non-finite linearisation at stage {}", i);
                return Err(SolveStatus::NanDetected);
            }

            self.qp.set_stage(
                i,
                &QpStage {
                    A: &sens.A,
                    B: &sens.B,
                    defect: &defect,
                    Hxx: &Hxx,
                    Hxu: &Hxu,
                    Huu: &Huu,
                    gx: &gx,
                    gu: &gu,
                },
            );
        }

        let x_N = self.x.column(N).into_owned();
        let r_e = self.model.cost_y_e(&x_N, &self.p[N]) - &self.yref[N];
        let J_e = self.model.cost_y_e_jacobian(&x_N, &self.p[N]);
        let WJ_e = &self.W[N] * &J_e;
        let H_e = J_e.transpose() * &WJ_e;
        let g_e = J_e.transpose() * (&self.W[N] * &r_e);
        if !all_finite(H_e.iter().chain(g_e.iter())) {
            warn!("non-finite linearisation at terminal stage");
            return Err(SolveStatus::NanDetected);
        }
        self.qp.set_terminal(&H_e, &g_e);
        guard.end();

        // State bounds relative to the current iterate
        for i in 0..=N {
            let idx = &self.idxb[i];
            let (lb, ub) = (&self.lbx[i], &self.ubx[i]);
            if let Some(k) = (0..idx.len()).find(|&k| lb[k] > ub[k]) {
                warn!(
                    "inconsistent bounds at stage {} on state {}: {} > {}",
                    i, idx[k], lb[k], ub[k]
                );
                return Err(SolveStatus::QpFailure);
            }
            let x_idx = Vector::<Dy>::from_iterator(idx.len(), idx.iter().map(|&j| self.x[(j, i)]));
            self.qp.set_bounds(i, &(lb - &x_idx), &(ub - &x_idx));
        }

        let (step, accurate) = match self.qp.solve() {
            QpOutcome::Solved { step, iter } => {
                *qp_iter += iter as usize;
                (step, true)
            }
            QpOutcome::Inaccurate { step, iter } => {
                *qp_iter += iter as usize;
                (step, false)
            }
            QpOutcome::Failed { reason, iter } => {
                *qp_iter += iter as usize;
                warn!("QP failed: {}", reason);
                return Err(SolveStatus::QpFailure);
            }
        };

        if !all_finite(step.iter()) {
            warn!("QP returned a non-finite step");
            return Err(SolveStatus::NanDetected);
        }

        // Add the deltas to the iterate
        fn add_delta((x0, delta_x): (&mut float, &float)) {
            *x0 += *delta_x
        }
        let (dx, du) = step.as_slice().split_at((N + 1) * nx);
        for (i, delta_x) in dx.chunks(nx).enumerate() {
            self.x.column_mut(i).iter_mut().zip(delta_x).for_each(add_delta);
        }
        for (i, delta_u) in du.chunks(nu).enumerate() {
            self.u.column_mut(i).iter_mut().zip(delta_u).for_each(add_delta);
        }

        Ok(Step {
            norm: step.amax(),
            accurate,
        })
    }

    fn evaluate_cost(&self) -> float {
        let N = self.N;
        let stage_cost: float = (0..N)
            .map(|i| {
                let x_i = self.x.column(i).into_owned();
                let u_i = self.u.column(i).into_owned();
                let r = self.model.cost_y(&x_i, &u_i, &self.p[i]) - &self.yref[i];
                0.5 * r.dot(&(&self.W[i] * &r))
            })
            .sum();

        let x_N = self.x.column(N).into_owned();
        let r_e = self.model.cost_y_e(&x_N, &self.p[N]) - &self.yref[N];
        stage_cost + 0.5 * r_e.dot(&(&self.W[N] * &r_e))
    }
}

fn check_vector(
    field: &'static str,
    stage: usize,
    value: &Vector<Dy>,
    len: usize,
) -> Result<(), OcpError> {
    if value.len() != len {
        return Err(OcpError::DimensionMismatch {
            field,
            stage,
            expected: (len, 1),
            got: (value.len(), 1),
        });
    }
    Ok(())
}

fn check_finite<'a, I>(field: &'static str, stage: usize, values: I) -> Result<(), OcpError>
where
    I: IntoIterator<Item = &'a float>,
{
    if !all_finite(values) {
        return Err(OcpError::NonFinite { field, stage });
    }
    Ok(())
}

impl OcpSolver for RtiSolver {
    fn N(&self) -> usize {
        self.N
    }

    fn dims(&self) -> ModelDims {
        self.dims
    }

    fn set_bounds(
        &mut self,
        stage: usize,
        bound: Bound,
        value: &Vector<Dy>,
    ) -> Result<(), OcpError> {
        self.check_stage(stage)?;
        let field = match bound {
            Bound::Lower => "lbx",
            Bound::Upper => "ubx",
        };
        check_vector(field, stage, value, self.idxb[stage].len())?;
        // Infinite bounds are allowed
        if any_nan(value.iter()) {
            return Err(OcpError::NonFinite { field, stage });
        }
        match bound {
            Bound::Lower => self.lbx[stage].copy_from(value),
            Bound::Upper => self.ubx[stage].copy_from(value),
        }
        Ok(())
    }

    fn bounds(&self, stage: usize, bound: Bound) -> Result<&Vector<Dy>, OcpError> {
        self.check_stage(stage)?;
        Ok(match bound {
            Bound::Lower => &self.lbx[stage],
            Bound::Upper => &self.ubx[stage],
        })
    }

    fn set_parameter(&mut self, stage: usize, value: &Vector<Dy>) -> Result<(), OcpError> {
        self.check_stage(stage)?;
        check_vector("p", stage, value, self.dims.np)?;
        check_finite("p", stage, value.iter())?;
        self.p[stage].copy_from(value);
        Ok(())
    }

    fn parameter(&self, stage: usize) -> Result<&Vector<Dy>, OcpError> {
        self.check_stage(stage)?;
        Ok(&self.p[stage])
    }

    fn set_cost_weight(&mut self, stage: usize, W: &Matrix<Dy, Dy>) -> Result<(), OcpError> {
        self.check_stage(stage)?;
        let (field, n) = if stage < self.N {
            ("W", self.dims.ny)
        } else {
            ("W_e", self.dims.ny_e)
        };
        if W.shape() != (n, n) {
            return Err(OcpError::DimensionMismatch {
                field,
                stage,
                expected: (n, n),
                got: W.shape(),
            });
        }
        check_finite(field, stage, W.iter())?;
        self.W[stage].copy_from(W);
        Ok(())
    }

    fn cost_weight(&self, stage: usize) -> Result<&Matrix<Dy, Dy>, OcpError> {
        self.check_stage(stage)?;
        Ok(&self.W[stage])
    }

    fn set_reference(&mut self, stage: usize, yref: &Vector<Dy>) -> Result<(), OcpError> {
        self.check_stage(stage)?;
        let (field, n) = if stage < self.N {
            ("yref", self.dims.ny)
        } else {
            ("yref_e", self.dims.ny_e)
        };
        check_vector(field, stage, yref, n)?;
        check_finite(field, stage, yref.iter())?;
        self.yref[stage].copy_from(yref);
        Ok(())
    }

    fn reference(&self, stage: usize) -> Result<&Vector<Dy>, OcpError> {
        self.check_stage(stage)?;
        Ok(&self.yref[stage])
    }

    fn solve(&mut self) -> SolveStatus {
        let _guard = flame::start_guard("rti solve");
        let start = Instant::now();

        let max_iter = match self.options.nlp_solver_type {
            NlpSolverType::SqpRti => 1,
            NlpSolverType::Sqp => self.options.nlp_solver_max_iter,
        };

        let mut stats = SolveStats::default();
        let mut status = SolveStatus::MaxIterations;
        for _ in 0..max_iter {
            stats.sqp_iter += 1;
            match self.sqp_step(&mut stats.qp_iter) {
                Ok(step) => {
                    let done = self.options.nlp_solver_type == NlpSolverType::SqpRti
                        || step.norm < self.options.nlp_solver_tol;
                    if done {
                        status = if step.accurate {
                            SolveStatus::Success
                        } else {
                            SolveStatus::QpInaccurate
                        };
                        break;
                    }
                }
                Err(failure) => {
                    status = failure;
                    break;
                }
            }
        }

        self.cost = self.evaluate_cost();
        stats.time = start.elapsed();
        self.stats = stats;

        debug!(
            "{:?} after {} sqp / {} qp iterations in {:?}, cost {:.6e}",
            status, stats.sqp_iter, stats.qp_iter, stats.time, self.cost
        );
        status
    }

    fn state(&self, stages: Range<usize>) -> Result<Matrix<Dy, Dy>, OcpError> {
        check_range(stages.clone(), self.N + 1)?;
        Ok(self.x.columns(stages.start, stages.len()).into_owned())
    }

    fn control(&self, stages: Range<usize>) -> Result<Matrix<Dy, Dy>, OcpError> {
        check_range(stages.clone(), self.N)?;
        Ok(self.u.columns(stages.start, stages.len()).into_owned())
    }

    fn cost(&self) -> float {
        self.cost
    }

    fn stats(&self) -> SolveStats {
        self.stats
    }

    fn reset(&mut self) {
        self.x.fill(0.0);
        self.u.fill(0.0);
        self.cost = 0.0;
        self.stats = SolveStats::default();
        self.qp.reset_warm_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::tests::pendulum_spec;
    use prelude::nalgebra::dvector;

    fn build(N: usize) -> RtiSolver {
        RtiEngine.build(pendulum_spec(N), N).unwrap()
    }

    #[test]
    fn build_checks_horizon() {
        assert_eq!(
            Some(OcpError::HorizonMismatch {
                spec: 10,
                requested: 12
            }),
            RtiEngine.build(pendulum_spec(10), 12).err()
        );

        let mut spec = pendulum_spec(10);
        spec.parameter_values = dvector![0.1, 0.2];
        assert!(matches!(
            RtiEngine.build(spec, 10).err(),
            Some(OcpError::InvalidSpec(_))
        ));
    }

    #[test]
    fn setters_check_stage_and_shape() {
        let mut solver = build(10);

        assert_eq!(
            Err(OcpError::StageOutOfRange { stage: 11, last: 10 }),
            solver.set_parameter(11, &dvector![0.0])
        );

        let W = Matrix::<Dy, Dy>::identity(3, 3);
        assert_eq!(
            Err(OcpError::DimensionMismatch {
                field: "W_e",
                stage: 10,
                expected: (2, 2),
                got: (3, 3)
            }),
            solver.set_cost_weight(10, &W)
        );
        assert_eq!(Ok(&Matrix::<Dy, Dy>::identity(2, 2)), solver.cost_weight(10));

        assert_eq!(
            Err(OcpError::NonFinite {
                field: "yref",
                stage: 3
            }),
            solver.set_reference(3, &dvector![0.0, float::NAN, 0.0])
        );

        // Stage 0 pins every state, later stages only bound omega
        assert!(solver.set_bounds(0, Bound::Lower, &dvector![0.0]).is_err());
        solver
            .set_bounds(4, Bound::Upper, &dvector![INFINITY])
            .unwrap();
        assert_eq!(&dvector![INFINITY], solver.bounds(4, Bound::Upper).unwrap());

        assert!(solver.state(0..12).is_err());
        assert!(solver.control(0..11).is_err());
        assert_eq!((2, 11), solver.state(0..11).unwrap().shape());
    }

    #[test]
    fn rest_position_is_a_zero_cost_fixed_point() {
        let mut solver = build(10);
        solver.set_bounds(0, Bound::Lower, &dvector![0.0, 0.0]).unwrap();
        solver.set_bounds(0, Bound::Upper, &dvector![0.0, 0.0]).unwrap();

        assert_eq!(SolveStatus::Success, solver.solve());
        assert_eq!(1, solver.stats().sqp_iter);
        assert!(solver.control(0..10).unwrap().amax() < 1e-6);
        assert!(solver.cost() < 1e-10);
    }

    #[test]
    fn one_qp_per_solve_in_rti_mode() {
        let mut solver = build(10);

        assert!(solver.solve().is_success());
        assert_eq!(1, solver.stats().sqp_iter);
        assert!(solver.stats().qp_iter >= 1);

        // Stage 0 is pinned to x0 after the first step
        let x0 = solver.state(0..1).unwrap();
        assert!(relative_eq!(x0[(0, 0)], 0.5, epsilon = 1e-5));
        assert!(relative_eq!(x0[(1, 0)], 0.0, epsilon = 1e-5));
    }

    #[test]
    fn rti_converges_to_sqp_solution() {
        let mut sqp_spec = pendulum_spec(10);
        sqp_spec.solver_options.nlp_solver_type = NlpSolverType::Sqp;
        let mut sqp = RtiEngine.build(sqp_spec, 10).unwrap();
        let status = sqp.solve();
        assert!(status == SolveStatus::Success || status == SolveStatus::QpInaccurate);
        assert!(sqp.stats().sqp_iter > 1);

        let mut rti = build(10);
        let first = {
            rti.solve();
            rti.state(0..11).unwrap()
        };
        for _ in 0..20 {
            rti.solve();
        }

        let expected = sqp.state(0..11).unwrap();
        assert!(relative_eq!(rti.state(0..11).unwrap(), expected, epsilon = 1e-4));
        assert!(relative_eq!(rti.control(0..10).unwrap(), sqp.control(0..10).unwrap(), epsilon = 1e-4));
        assert!(relative_eq!(rti.cost(), sqp.cost(), epsilon = 1e-6));
        // The first iteration is only an approximation of the nonlinear solution
        assert!(!relative_eq!(first, expected, epsilon = 1e-6));
    }

    #[test]
    fn inconsistent_bounds_leave_iterate_unchanged() {
        let mut solver = build(10);
        solver.set_bounds(3, Bound::Lower, &dvector![1.0]).unwrap();
        solver.set_bounds(3, Bound::Upper, &dvector![-1.0]).unwrap();

        assert_eq!(SolveStatus::QpFailure, solver.solve());
        assert_eq!(0.0, solver.state(0..11).unwrap().amax());
        assert_eq!(0.0, solver.control(0..10).unwrap().amax());
    }

    #[test]
    fn reset_discards_iterate() {
        let mut solver = build(10);
        solver.solve();
        assert!(solver.state(0..11).unwrap().amax() > 0.1);

        solver.reset();
        assert_eq!(0.0, solver.state(0..11).unwrap().amax());
        assert_eq!(0.0, solver.cost());
        assert_eq!(SolveStats::default(), solver.stats());
    }
}
