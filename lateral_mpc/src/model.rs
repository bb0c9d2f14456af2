// Path relative kinematic model of a point offset from the centre of rotation by
// `rotation_radius`, steered through the rate of change of curvature.

use prelude::nalgebra::{dmatrix, dvector};
use prelude::*;

use ocp::{ModelDims, OcpModel};

/// Keeps the heading penalty from vanishing near standstill
pub const HEADING_SPEED_OFFSET: float = 5.0;
pub const STEER_RATE_SCALE: float = 4.0;

pub const NX: usize = 4;
pub const NU: usize = 1;
pub const NP: usize = 2;
pub const NY: usize = 3;
pub const NY_E: usize = 2;

pub const DIMS: ModelDims = ModelDims {
    nx: NX,
    nu: NU,
    np: NP,
    ny: NY,
    ny_e: NY_E,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct LateralModel;

fn unpack(x: &Vector<Dy>, p: &Vector<Dy>) -> [float; 6] {
    [x[0], x[1], x[2], x[3], p[0], p[1]]
}

impl OcpModel for LateralModel {
    fn name(&self) -> &'static str {
        "lat"
    }

    fn dims(&self) -> ModelDims {
        DIMS
    }

    fn state_names(&self) -> &'static [&'static str] {
        &["x_ego", "y_ego", "psi_ego", "curv_ego"]
    }

    fn control_names(&self) -> &'static [&'static str] {
        &["curv_rate"]
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["v_ego", "rotation_radius"]
    }

    fn state_equation(&self, x: &Vector<Dy>, u: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy> {
        let [_x_ego, _y_ego, psi, curv, v, r] = unpack(x, p);
        let (sin_psi, cos_psi) = psi.sin_cos();
        let yaw_rate = v * curv;

        let x_dot = v * cos_psi - r * sin_psi * yaw_rate;
        let y_dot = v * sin_psi + r * cos_psi * yaw_rate;
        let psi_dot = yaw_rate;
        let curv_dot = u[0];

        dvector![x_dot, y_dot, psi_dot, curv_dot]
    }

    fn linearise(
        &self,
        x0: &Vector<Dy>,
        _u0: &Vector<Dy>,
        p0: &Vector<Dy>,
    ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>) {
        let [_x_ego, _y_ego, psi, curv, v, r] = unpack(x0, p0);
        let (sin_psi, cos_psi) = psi.sin_cos();
        let yaw_rate = v * curv;

        #[rustfmt::skip]
        let A = dmatrix![
            0.0, 0.0, -v * sin_psi - r * cos_psi * yaw_rate, -r * sin_psi * v;
            0.0, 0.0, v * cos_psi - r * sin_psi * yaw_rate, r * cos_psi * v;
            0.0, 0.0, 0.0, v;
            0.0, 0.0, 0.0, 0.0
        ];

        let B = dmatrix![0.0; 0.0; 0.0; 1.0];

        (A, B)
    }

    fn linearise_sparsity(&self) -> (BoolMatrix<Dy, Dy>, BoolMatrix<Dy, Dy>) {
        #[rustfmt::skip]
        let A_mask = BoolMatrix::<Dy, Dy>::from_row_slice(NX, NX, &[
            false, false, true, true,
            false, false, true, true,
            false, false, false, true,
            false, false, false, false,
        ]);

        let B_mask = BoolMatrix::<Dy, Dy>::from_row_slice(NX, NU, &[false, false, false, true]);

        (A_mask, B_mask)
    }

    fn cost_y(&self, x: &Vector<Dy>, u: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy> {
        let [_x_ego, y, psi, _curv, v, _r] = unpack(x, p);
        let scale = v + HEADING_SPEED_OFFSET;
        dvector![y, scale * psi, scale * STEER_RATE_SCALE * u[0]]
    }

    fn cost_y_jacobian(
        &self,
        x: &Vector<Dy>,
        _u: &Vector<Dy>,
        p: &Vector<Dy>,
    ) -> (Matrix<Dy, Dy>, Matrix<Dy, Dy>) {
        let [.., v, _r] = unpack(x, p);
        let scale = v + HEADING_SPEED_OFFSET;

        #[rustfmt::skip]
        let Jx = dmatrix![
            0.0, 1.0, 0.0, 0.0;
            0.0, 0.0, scale, 0.0;
            0.0, 0.0, 0.0, 0.0
        ];
        let Ju = dmatrix![0.0; 0.0; scale * STEER_RATE_SCALE];

        (Jx, Ju)
    }

    fn cost_y_e(&self, x: &Vector<Dy>, p: &Vector<Dy>) -> Vector<Dy> {
        let [_x_ego, y, psi, _curv, v, _r] = unpack(x, p);
        dvector![y, (v + HEADING_SPEED_OFFSET) * psi]
    }

    fn cost_y_e_jacobian(&self, x: &Vector<Dy>, p: &Vector<Dy>) -> Matrix<Dy, Dy> {
        let [.., v, _r] = unpack(x, p);

        #[rustfmt::skip]
        let J = dmatrix![
            0.0, 1.0, 0.0, 0.0;
            0.0, 0.0, v + HEADING_SPEED_OFFSET, 0.0
        ];
        J
    }
}
