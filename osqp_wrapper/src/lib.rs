use osqp::Problem as InnerProblem;
pub use osqp::{CscMatrix, Settings, SetupError, Solution, Status};

use prelude::flame;
use prelude::*;

/// OSQP problem taking `sparse` matrices, with every call recorded as a flame span.
pub struct Problem {
    inner: InnerProblem,
}

#[allow(non_snake_case)]
impl Problem {
    pub fn new(
        P: &sparse::CscMatrix,
        q: &[float],
        A: &sparse::CscMatrix,
        l: &[float],
        u: &[float],
        settings: &Settings,
    ) -> Result<Problem, SetupError> {
        let _guard = flame::start_guard("osqp setup");
        debug_assert!(P.is_structurally_upper_tri(), "P must be upper triangular");
        Ok(Problem {
            inner: InnerProblem::new(convert_sparse(P), q, convert_sparse(A), l, u, settings)?,
        })
    }

    pub fn update_lin_cost(&mut self, q: &[float]) {
        let _guard = flame::start_guard("osqp update_lin_cost");
        self.inner.update_lin_cost(q)
    }

    pub fn update_bounds(&mut self, l: &[float], u: &[float]) {
        let _guard = flame::start_guard("osqp update_bounds");
        self.inner.update_bounds(l, u)
    }

    /// Both matrices must keep the sparsity structure they were created with.
    pub fn update_P_A(&mut self, P: &sparse::CscMatrix, A: &sparse::CscMatrix) {
        let _guard = flame::start_guard("osqp update_P_A");
        self.inner.update_P_A(convert_sparse(P), convert_sparse(A))
    }

    pub fn warm_start(&mut self, x: &[float], y: &[float]) {
        let _guard = flame::start_guard("osqp warm_start");
        self.inner.warm_start(x, y)
    }

    pub fn solve(&mut self) -> Status<'_> {
        let _guard = flame::start_guard("osqp solve");
        self.inner.solve()
    }
}

pub fn convert_sparse(this: &sparse::CscMatrix) -> CscMatrix<'_> {
    let (nrows, ncols) = this.shape();
    CscMatrix {
        nrows,
        ncols,
        indptr: this.indptr().into(),
        indices: this.indices().into(),
        data: this.data().into(),
    }
}
