use serde::Serialize;

use prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModelDims {
    /// States
    pub nx: usize,
    /// Controls
    pub nu: usize,
    /// Live parameters
    pub np: usize,
    /// Stage cost residuals
    pub ny: usize,
    /// Terminal cost residuals
    pub ny_e: usize,
}

/// A continuous time model together with its nonlinear least squares cost residuals.
///
/// Stage residuals `y(x, u, p)` are weighted as `½ (y - yref)ᵀ W (y - yref)` and the terminal
/// residual `y_e(x, p)` as `½ (y_e - yref_e)ᵀ W_e (y_e - yref_e)`.
pub trait OcpModel: Send {
    fn name(&self) -> &'static str;

    fn dims(&self) -> ModelDims;

    fn state_names(&self) -> &'static [&'static str];

    fn control_names(&self) -> &'static [&'static str];

    fn parameter_names(&self) -> &'static [&'static str];

    // Returns the state space derivative at a given operating point
    fn state_equation(
        &self,
        x: &Vector<Dy>,
        u: &Vector<Dy>,
        p: &Vector<Dy>,
    ) -> Vector<Dy>;

    // Returns the jacobian of the state space system with respect to its state and inputs
    fn linearise(
        &self,
        x0: &Vector<Dy>,
        u0: &Vector<Dy>,
        p0: &Vector<Dy>,
    ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>);

    /// Returns two boolean matrices with true everywhere A and B could contain a non-zero value
    fn linearise_sparsity(&self) -> (BoolMatrix<Dy, Dy>, BoolMatrix<Dy, Dy>) {
        let ModelDims { nx, nu, .. } = self.dims();
        let A_mask = BoolMatrix::<Dy, Dy>::from_element(nx, nx, true);
        let B_mask = BoolMatrix::<Dy, Dy>::from_element(nx, nu, true);
        (A_mask, B_mask)
    }

    fn cost_y(&self, x: &Vector<Dy>, u: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy>;

    /// Returns the jacobian of the stage residual with respect to the state and the inputs
    fn cost_y_jacobian(
        &self,
        x: &Vector<Dy>,
        u: &Vector<Dy>,
        p: &Vector<Dy>,
    ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>);

    fn cost_y_e(&self, x: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy>;

    fn cost_y_e_jacobian(&self, x: &Vector<Dy>, p: &Vector<Dy>) -> Matrix<Dy, Dy>;
}

/// Sparsity of the discretised `A_d` and `B_d` for any explicit integration of a model with the
/// given continuous sparsity.
///
/// `A_d` can only be non-zero where a state is reachable through a chain of `A` entries,
/// including the state itself. `B_d` follows by pushing the `B` pattern through that closure.
pub fn discretise_sparsity(
    A: &BoolMatrix<Dy, Dy>,
    B: &BoolMatrix<Dy, Dy>,
) -> (BoolMatrix<Dy, Dy>, BoolMatrix<Dy, Dy>) {
    let nx = A.nrows();
    assert_eq!(A.ncols(), nx);
    assert_eq!(B.nrows(), nx);

    let bool_mul = |l: &BoolMatrix<Dy, Dy>, r: &BoolMatrix<Dy, Dy>| {
        BoolMatrix::<Dy, Dy>::from_fn(l.nrows(), r.ncols(), |i, j| {
            (0..l.ncols()).any(|k| l[(i, k)] && r[(k, j)])
        })
    };

    let mut reach = BoolMatrix::<Dy, Dy>::from_fn(nx, nx, |i, j| i == j || A[(i, j)]);
    loop {
        let next = bool_mul(&reach, &reach);
        if next == reach {
            break;
        }
        reach = next;
    }

    let B_d = bool_mul(&reach, B);
    (reach, B_d)
}
