use prelude::*;

use crate::OcpModel;

/// Classic RK4 over `dt` split into `num_steps` equal sub-steps.
pub fn integrate(
    model: &dyn OcpModel,
    dt: float,
    num_steps: usize,
    x: &Vector<Dy>,
    u: &Vector<Dy>,
    p: &Vector<Dy>,
) -> Vector<Dy> {
    let h = dt / num_steps as float;
    let f = |x: &Vector<Dy>| model.state_equation(x, u, p);

    let mut y = x.clone();
    for _ in 0..num_steps {
        let k1 = f(&y) * h;
        let k2 = f(&(&y + 0.5 * &k1)) * h;
        let k3 = f(&(&y + 0.5 * &k2)) * h;
        let k4 = f(&(&y + &k3)) * h;
        y += (k1 + 2.0 * (k2 + k3) + k4) / 6.0;
    }
    y
}

/// Result of an integration step together with its forward sensitivities.
#[derive(Clone, Debug)]
pub struct Sensitivities {
    pub x_next: Vector<Dy>,
    /// d x_next / d x
    pub A: Matrix<Dy, Dy>,
    /// d x_next / d u
    pub B: Matrix<Dy, Dy>,
}

/// RK4 applied to the state and its variational equations.
///
/// For an explicit scheme this gives the exact derivative of the discrete map returned by
/// [`integrate`], not an approximation of the continuous one.
pub fn integrate_with_sensitivities(
    model: &dyn OcpModel,
    dt: float,
    num_steps: usize,
    x: &Vector<Dy>,
    u: &Vector<Dy>,
    p: &Vector<Dy>,
) -> Sensitivities {
    let (nx, nu) = (x.len(), u.len());
    let h = dt / num_steps as float;

    // (x, Sx, Su) -> (x', Sx', Su')
    let f = |x: &Vector<Dy>, Sx: &Matrix<Dy, Dy>, Su: &Matrix<Dy, Dy>| {
        let x_dot = model.state_equation(x, u, p);
        let (A, B) = model.linearise(x, u, p);
        let Sx_dot = &A * Sx;
        let Su_dot = &A * Su + B;
        (x_dot, Sx_dot, Su_dot)
    };

    let mut y = x.clone();
    let mut Sx = Matrix::<Dy, Dy>::identity(nx, nx);
    let mut Su = Matrix::<Dy, Dy>::zeros(nx, nu);

    for _ in 0..num_steps {
        let (k1, K1x, K1u) = f(&y, &Sx, &Su);
        let (k2, K2x, K2u) = f(
            &(&y + 0.5 * h * &k1),
            &(&Sx + 0.5 * h * &K1x),
            &(&Su + 0.5 * h * &K1u),
        );
        let (k3, K3x, K3u) = f(
            &(&y + 0.5 * h * &k2),
            &(&Sx + 0.5 * h * &K2x),
            &(&Su + 0.5 * h * &K2u),
        );
        let (k4, K4x, K4u) = f(&(&y + h * &k3), &(&Sx + h * &K3x), &(&Su + h * &K3u));

        y += (k1 + 2.0 * (k2 + k3) + k4) * (h / 6.0);
        Sx += (K1x + 2.0 * (K2x + K3x) + K4x) * (h / 6.0);
        Su += (K1u + 2.0 * (K2u + K3u) + K4u) * (h / 6.0);
    }

    Sensitivities {
        x_next: y,
        A: Sx,
        B: Su,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ModelDims;
    use prelude::nalgebra::{dmatrix, dvector};

    /// Pendulum with viscous damping driven by a torque, `p = [damping]`.
    pub(crate) struct Pendulum;

    impl OcpModel for Pendulum {
        fn name(&self) -> &'static str {
            "pendulum"
        }

        fn dims(&self) -> ModelDims {
            ModelDims {
                nx: 2,
                nu: 1,
                np: 1,
                ny: 3,
                ny_e: 2,
            }
        }

        fn state_names(&self) -> &'static [&'static str] {
            &["theta", "omega"]
        }

        fn control_names(&self) -> &'static [&'static str] {
            &["torque"]
        }

        fn parameter_names(&self) -> &'static [&'static str] {
            &["damping"]
        }

        fn state_equation(&self, x: &Vector<Dy>, u: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy> {
            dvector![x[1], -x[0].sin() - p[0] * x[1] + u[0]]
        }

        fn linearise(
            &self,
            x0: &Vector<Dy>,
            _u0: &Vector<Dy>,
            p0: &Vector<Dy>,
        ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>) {
            let A = dmatrix![0.0, 1.0; -x0[0].cos(), -p0[0]];
            let B = dmatrix![0.0; 1.0];
            (A, B)
        }

        fn cost_y(&self, x: &Vector<Dy>, u: &Vector<Dy>, _p: &Vector<Dy>) -> Vector<Dy> {
            dvector![x[0], x[1], u[0]]
        }

        fn cost_y_jacobian(
            &self,
            _x: &Vector<Dy>,
            _u: &Vector<Dy>,
            _p: &Vector<Dy>,
        ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>) {
            (
                dmatrix![1.0, 0.0; 0.0, 1.0; 0.0, 0.0],
                dmatrix![0.0; 0.0; 1.0],
            )
        }

        fn cost_y_e(&self, x: &Vector<Dy>, _p: &Vector<Dy>) -> Vector<Dy> {
            x.clone()
        }

        fn cost_y_e_jacobian(&self, _x: &Vector<Dy>, _p: &Vector<Dy>) -> Matrix<Dy, Dy> {
            Matrix::<Dy, Dy>::identity(2, 2)
        }
    }

    #[test]
    fn rk4_matches_free_oscillation() {
        // Small angle undamped pendulum is a harmonic oscillator
        let x = dvector![1e-4, 0.0];
        let x_next = integrate(&Pendulum, 1.0, 20, &x, &dvector![0.0], &dvector![0.0]);

        assert!(relative_eq!(x_next[0], 1e-4 * 1.0f64.cos(), max_relative = 1e-5));
        assert!(relative_eq!(x_next[1], -1e-4 * 1.0f64.sin(), max_relative = 1e-5));
    }

    #[test]
    fn sensitivities_match_finite_differences() {
        let x = dvector![0.7, -0.3];
        let u = dvector![0.4];
        let p = dvector![0.2];
        let (dt, steps) = (0.3, 3);

        let sens = integrate_with_sensitivities(&Pendulum, dt, steps, &x, &u, &p);
        let x_next = integrate(&Pendulum, dt, steps, &x, &u, &p);
        assert!(relative_eq!(sens.x_next, x_next, epsilon = 1e-12));

        let eps = 1e-6;
        for j in 0..2 {
            let mut x_plus = x.clone();
            let mut x_minus = x.clone();
            x_plus[j] += eps;
            x_minus[j] -= eps;
            let column = (integrate(&Pendulum, dt, steps, &x_plus, &u, &p)
                - integrate(&Pendulum, dt, steps, &x_minus, &u, &p))
                / (2.0 * eps);
            assert!(relative_eq!(sens.A.column(j).into_owned(), column, epsilon = 1e-7));
        }

        let column = (integrate(&Pendulum, dt, steps, &x, &(&u + dvector![eps]), &p)
            - integrate(&Pendulum, dt, steps, &x, &(&u - dvector![eps]), &p))
            / (2.0 * eps);
        assert!(relative_eq!(sens.B.column(0).into_owned(), column, epsilon = 1e-7));
    }
}
