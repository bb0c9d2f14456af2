use log::Level::Debug;
use osqp_wrapper::{Problem, Settings, Status};

use prelude::*;

use crate::{ModelDims, OcpError, SolverOptions};

/// Quadratic and linear cost terms of one stage together with its linearised dynamics.
pub struct QpStage<'a> {
    pub A: &'a Matrix<Dy, Dy>,
    pub B: &'a Matrix<Dy, Dy>,
    /// `x_{i+1}^pred - x_{i+1}`
    pub defect: &'a Vector<Dy>,
    pub Hxx: &'a Matrix<Dy, Dy>,
    pub Hxu: &'a Matrix<Dy, Dy>,
    pub Huu: &'a Matrix<Dy, Dy>,
    pub gx: &'a Vector<Dy>,
    pub gu: &'a Vector<Dy>,
}

pub enum QpOutcome {
    Solved { step: Vector<Dy>, iter: u32 },
    /// The QP stopped before reaching the requested accuracy
    Inaccurate { step: Vector<Dy>, iter: u32 },
    Failed { reason: &'static str, iter: u32 },
}

/// The QP of one SQP iteration over the deltas `z = [Δx_0, .., Δx_N, Δu_0, .., Δu_{N-1}]`.
///
/// Constraint rows are ordered as the `N * nx` dynamics equalities followed by the state box
/// rows of stages `0..=N`.
pub struct OsqpQp {
    problem: Problem,
    N: usize,
    nx: usize,
    nu: usize,
    // Objective
    P: sparse::CscMatrix,
    q: Vector<Dy>,
    Hxx_blocks: Vec<sparse::BlockRef>,
    Hxu_blocks: Vec<sparse::BlockRef>,
    Huu_blocks: Vec<sparse::BlockRef>,
    // Constraints
    A: sparse::CscMatrix,
    l: Vector<Dy>,
    u: Vector<Dy>,
    A_blocks: Vec<sparse::BlockRef>,
    B_blocks: Vec<sparse::BlockRef>,
    bound_rows: Vec<(usize, usize)>,
}

impl OsqpQp {
    pub fn new(
        dims: ModelDims,
        N: usize,
        A_sparsity: &BoolMatrix<Dy, Dy>,
        B_sparsity: &BoolMatrix<Dy, Dy>,
        idxb: &[Vec<usize>],
        options: &SolverOptions,
    ) -> Result<OsqpQp, OcpError> {
        let ModelDims { nx, nu, .. } = dims;
        assert_eq!(idxb.len(), N + 1);
        let n_x = (N + 1) * nx;
        let n_u = N * nu;

        let upper_x = BoolMatrix::<Dy, Dy>::from_fn(nx, nx, |r, c| r <= c);
        let upper_u = BoolMatrix::<Dy, Dy>::from_fn(nu, nu, |r, c| r <= c);
        let full_xu = BoolMatrix::<Dy, Dy>::from_element(nx, nu, true);

        // Build the Gauss-Newton hessian, only the upper triangle is stored
        let (Hxx, Hxx_blocks): (Vec<_>, Vec<_>) =
            (0..=N).map(|_| sparse::block_mut(&upper_x)).unzip();
        let (Hxu, Hxu_blocks): (Vec<_>, Vec<_>) =
            (0..N).map(|_| sparse::block_mut(&full_xu)).unzip();
        let (Huu, Huu_blocks): (Vec<_>, Vec<_>) =
            (0..N).map(|_| sparse::block_mut(&upper_u)).unzip();

        // The terminal state has no cross term
        let Pxu = sparse::vstack(&[sparse::block_diag(&Hxu), sparse::zeros(nx, n_u)]);
        let P = sparse::bmat(&[
            &[Some(sparse::block_diag(&Hxx)), Some(Pxu)],
            &[None, Some(sparse::block_diag(&Huu))],
        ])
        .build_csc();

        // Build state evolution matrices
        // Δx_{i+1} - A_i Δx_i - B_i Δu_i = defect_i
        let (Ax, A_blocks): (Vec<_>, Vec<_>) =
            (0..N).map(|_| sparse::block_mut(A_sparsity)).unzip();
        let (Au, B_blocks): (Vec<_>, Vec<_>) =
            (0..N).map(|_| sparse::block_mut(B_sparsity)).unzip();

        let Ax = sparse::hstack(&[sparse::block_diag(&Ax), sparse::zeros(N * nx, nx)])
            + sparse::hstack(&[sparse::zeros(N * nx, nx), sparse::eye(N * nx)]);
        let Au = sparse::block_diag(&Au);

        // State box rows
        let selections: Vec<_> = idxb.iter().map(|idx| sparse::selection(nx, idx)).collect();
        let bound_rows = idxb
            .iter()
            .scan(N * nx, |start, idx| {
                let rows = (*start, idx.len());
                *start += idx.len();
                Some(rows)
            })
            .collect::<Vec<_>>();
        let n_bounds: usize = idxb.iter().map(Vec::len).sum();

        let A = sparse::bmat(&[
            &[Some(Ax), Some(Au)],
            &[Some(sparse::block_diag(&selections)), None],
        ])
        .build_csc();

        let q = Vector::<Dy>::zeros(n_x + n_u);
        let l = Vector::<Dy>::from_iterator(
            N * nx + n_bounds,
            (0..N * nx).map(|_| 0.0).chain((0..n_bounds).map(|_| NEG_INFINITY)),
        );
        let u = Vector::<Dy>::from_iterator(
            N * nx + n_bounds,
            (0..N * nx).map(|_| 0.0).chain((0..n_bounds).map(|_| INFINITY)),
        );

        let settings = Settings::default()
            .verbose(log_enabled!(Debug))
            .polish(options.qp_solver_polish)
            .eps_abs(options.qp_solver_tol)
            .eps_rel(options.qp_solver_tol)
            .max_iter(options.qp_solver_iter_max)
            .warm_start(options.qp_solver_warm_start);

        let problem = Problem::new(&P, q.as_slice(), &A, l.as_slice(), u.as_slice(), &settings)
            .map_err(|e| OcpError::QpSetup(format!("{:?}", e)))?;

        debug!(
            "qp: {} variables, {} constraints, nnz(P) = {}, nnz(A) = {}",
            n_x + n_u,
            l.len(),
            P.nnz(),
            A.nnz()
        );

        Ok(OsqpQp {
            problem,
            N,
            nx,
            nu,
            P,
            q,
            Hxx_blocks,
            Hxu_blocks,
            Huu_blocks,
            A,
            l,
            u,
            A_blocks,
            B_blocks,
            bound_rows,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.q.len()
    }

    pub fn set_stage(&mut self, i: usize, s: &QpStage) {
        let (N, nx, nu) = (self.N, self.nx, self.nu);
        assert!(i < N);

        self.A.set_block(&self.A_blocks[i], &-s.A);
        self.A.set_block(&self.B_blocks[i], &-s.B);
        self.l.rows_mut(i * nx, nx).copy_from(s.defect);
        self.u.rows_mut(i * nx, nx).copy_from(s.defect);

        self.P.set_block(&self.Hxx_blocks[i], &s.Hxx.upper_triangle());
        self.P.set_block(&self.Hxu_blocks[i], s.Hxu);
        self.P.set_block(&self.Huu_blocks[i], &s.Huu.upper_triangle());

        self.q.rows_mut(i * nx, nx).copy_from(s.gx);
        self.q.rows_mut((N + 1) * nx + i * nu, nu).copy_from(s.gu);
    }

    pub fn set_terminal(&mut self, Hxx: &Matrix<Dy, Dy>, gx: &Vector<Dy>) {
        let (N, nx) = (self.N, self.nx);
        self.P.set_block(&self.Hxx_blocks[N], &Hxx.upper_triangle());
        self.q.rows_mut(N * nx, nx).copy_from(gx);
    }

    /// Bounds on the state deltas of stage `i`.
    pub fn set_bounds(&mut self, i: usize, l: &Vector<Dy>, u: &Vector<Dy>) {
        let (start, len) = self.bound_rows[i];
        self.l.rows_mut(start, len).copy_from(l);
        self.u.rows_mut(start, len).copy_from(u);
    }

    pub fn solve(&mut self) -> QpOutcome {
        self.problem.update_P_A(&self.P, &self.A);
        self.problem.update_lin_cost(self.q.as_slice());
        self.problem
            .update_bounds(self.l.as_slice(), self.u.as_slice());

        let n = self.q.len();
        let status = self.problem.solve();
        let iter = status.iter();
        match status {
            Status::Solved(solution) => QpOutcome::Solved {
                step: Vector::<Dy>::from_iterator(n, solution.x().iter().cloned()),
                iter,
            },
            Status::SolvedInaccurate(solution)
            | Status::MaxIterationsReached(solution)
            | Status::TimeLimitReached(solution) => QpOutcome::Inaccurate {
                step: Vector::<Dy>::from_iterator(n, solution.x().iter().cloned()),
                iter,
            },
            Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => {
                QpOutcome::Failed {
                    reason: "primal infeasible",
                    iter,
                }
            }
            Status::DualInfeasible(_) | Status::DualInfeasibleInaccurate(_) => QpOutcome::Failed {
                reason: "dual infeasible",
                iter,
            },
            Status::NonConvex(_) => QpOutcome::Failed {
                reason: "non-convex",
                iter,
            },
            _ => QpOutcome::Failed {
                reason: "unknown status",
                iter,
            },
        }
    }

    /// Drops the primal and dual warm start.
    pub fn reset_warm_start(&mut self) {
        let x = vec![0.0; self.q.len()];
        let y = vec![0.0; self.l.len()];
        self.problem.warm_start(&x, &y);
    }

    #[cfg(test)]
    pub(crate) fn dense_P(&self) -> Matrix<Dy, Dy> {
        self.P.to_dense()
    }

    #[cfg(test)]
    pub(crate) fn dense_A(&self) -> Matrix<Dy, Dy> {
        self.A.to_dense()
    }

    #[cfg(test)]
    pub(crate) fn bounds(&self) -> (&Vector<Dy>, &Vector<Dy>) {
        (&self.l, &self.u)
    }
}
