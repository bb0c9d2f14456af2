#![allow(non_snake_case)]

use lateral_mpc::model::{NU, NX};
use lateral_mpc::{
    Horizon, LatMpcConfig, LatMpcError, LateralModel, LateralMpc, SolveStatus, MAX_HEADING,
};
use ocp::{erk, Bound, NlpSolverType, OcpSolver};
use prelude::nalgebra::dvector;
use prelude::*;

const N: usize = 16;

fn zeros() -> Vec<float> {
    vec![0.0; N + 1]
}

fn max_abs_diff(a: &Matrix<Dy, Dy>, b: &Matrix<Dy, Dy>) -> float {
    (a - b).amax()
}

#[test]
fn zero_problem_has_zero_solution() {
    // At standstill the heading residual is only scaled by its 5.0 floor
    for &v_ego in &[0.0, 10.0] {
        let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
        mpc.set_weights(1.0, 1.0, 1.0).unwrap();

        let status = mpc.run(&[0.0; 4], v_ego, 0.0, &zeros(), &zeros()).unwrap();

        assert_eq!(SolveStatus::Success, status);
        assert!(mpc.u_sol().amax() < 1e-5);
        assert!(mpc.cost().abs() < 1e-8);
        assert_eq!((NX, N + 1), mpc.x_sol().shape());
        assert_eq!((NU, N), mpc.u_sol().shape());
    }
}

#[test]
fn standstill_keeps_the_vehicle_in_place() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();

    for _ in 0..3 {
        mpc.run(&[0.0; 4], 0.0, 1.5, &zeros(), &zeros()).unwrap();
    }

    assert!(mpc.x_sol().amax() < 1e-6);
    assert!(mpc.u_sol().amax() < 1e-5);
    assert!(mpc.cost().abs() < 1e-8);
}

#[test]
fn repeated_runs_settle() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();
    let x0 = [0.0, 0.5, 0.0, 0.0];

    for _ in 0..30 {
        mpc.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();
    }
    let x_prev = mpc.x_sol().clone();
    let u_prev = mpc.u_sol().clone();

    mpc.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();
    assert!(max_abs_diff(&x_prev, mpc.x_sol()) < 1e-3);
    assert!(max_abs_diff(&u_prev, mpc.u_sol()) < 1e-3);
    assert_eq!(1, mpc.solver().stats().sqp_iter);
}

#[test]
fn settled_rti_matches_full_sqp() {
    let x0 = [0.0, 0.5, 0.0, 0.0];

    let mut rti = LateralMpc::new(Horizon::lateral()).unwrap();
    rti.set_weights(1.0, 1.0, 1.0).unwrap();
    for _ in 0..40 {
        rti.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();
    }

    let mut config = LatMpcConfig::default();
    config.solver.nlp_solver_type = NlpSolverType::Sqp;
    let mut sqp = LateralMpc::from_config(&config).unwrap();
    sqp.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();

    assert!(max_abs_diff(rti.u_sol(), sqp.u_sol()) < 1e-3);
    assert!(max_abs_diff(rti.x_sol(), sqp.x_sol()) < 1e-3);
}

#[test]
fn first_run_depends_on_the_initial_guess() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 0.01, 0.01).unwrap();
    let x0 = [0.0, 2.0, 0.0, 0.0];

    mpc.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();
    let x_first = mpc.x_sol().clone();
    mpc.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();

    assert!(max_abs_diff(&x_first, mpc.x_sol()) > 1e-6);

    mpc.reset();
    mpc.run(&x0, 10.0, 0.0, &zeros(), &zeros()).unwrap();
    assert!(max_abs_diff(&x_first, mpc.x_sol()) < 1e-4);
}

#[test]
fn stage_zero_is_pinned_to_the_measured_state() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();
    let x0 = [0.0, -0.3, 0.05, 0.001];

    mpc.run(&x0, 20.0, 1.5, &zeros(), &zeros()).unwrap();

    let x0 = dvector![0.0, -0.3, 0.05, 0.001];
    assert_eq!(&x0, mpc.solver().bounds(0, Bound::Lower).unwrap());
    assert_eq!(&x0, mpc.solver().bounds(0, Bound::Upper).unwrap());
    for r in 0..NX {
        assert!((mpc.x_sol()[(r, 0)] - x0[r]).abs() < 1e-6);
    }
}

#[test]
fn heading_stays_inside_its_box() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();
    let heading_pts = vec![3.0; N + 1];

    for _ in 0..10 {
        mpc.run(&[0.0; 4], 10.0, 0.0, &zeros(), &heading_pts).unwrap();
    }

    for i in 0..=N {
        assert!(mpc.x_sol()[(2, i)].abs() <= MAX_HEADING + 1e-3);
    }
}

#[test]
fn terminal_weight_follows_interleaved_updates() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();

    mpc.set_weights(2.0, 4.0, 1.0).unwrap();
    mpc.run(&[0.0; 4], 10.0, 0.0, &zeros(), &zeros()).unwrap();
    mpc.set_weights(20.0, 40.0, 1.0).unwrap();
    mpc.run(&[0.0; 4], 10.0, 0.0, &zeros(), &zeros()).unwrap();

    let W_e = mpc.solver().cost_weight(N).unwrap();
    assert_eq!((2, 2), W_e.shape());
    assert!((W_e[(0, 0)] - 3.0).abs() < 1e-12);
    assert!((W_e[(1, 1)] - 6.0).abs() < 1e-12);

    let W = mpc.solver().cost_weight(N - 1).unwrap();
    assert_eq!(40.0, W[(1, 1)]);
}

#[test]
fn mismatched_reference_is_rejected() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();

    let err = mpc
        .run(&[0.0; 4], 10.0, 0.0, &vec![0.0; N], &zeros())
        .unwrap_err();
    assert_eq!(
        LatMpcError::LengthMismatch {
            name: "y_pts",
            expected: N + 1,
            got: N
        },
        err
    );
    assert_eq!(None, mpc.status());
}

#[test]
fn config_selects_horizon_length() {
    let mut config = LatMpcConfig::default();
    config.N = 10;
    let mpc = LateralMpc::from_config(&config).unwrap();

    assert_eq!(10, mpc.horizon().N());
    assert_eq!(10, mpc.solver().N());
    assert!((mpc.horizon().tf() - 0.9765625).abs() < 1e-12);
}

/// Drives the lateral model with the first planned curvature rate of every cycle.
fn closed_loop(
    mpc: &mut LateralMpc,
    x0: Vector<Dy>,
    v_ego: float,
    rotation_radius: float,
    steps: usize,
) -> Vector<Dy> {
    let dt = 0.05;
    let p = dvector![v_ego, rotation_radius];

    let mut x = x0;
    for _ in 0..steps {
        x[0] = 0.0;
        let status = mpc
            .run(x.as_slice(), v_ego, rotation_radius, &zeros(), &zeros())
            .unwrap();
        assert_ne!(SolveStatus::QpFailure, status);
        assert_ne!(SolveStatus::NanDetected, status);

        let u = dvector![mpc.u_sol()[(0, 0)]];
        x = erk::integrate(&LateralModel, dt, 4, &x, &u, &p);
    }
    x
}

#[test]
fn closed_loop_converges_to_the_path() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();

    let x = closed_loop(&mut mpc, dvector![0.0, 1.0, 0.0, 0.0], 15.0, 0.0, 200);

    assert!(x[1].abs() < 0.1);
    assert!(x[2].abs() < 0.01);
    assert!(x[3].abs() < 1e-3);
    assert!(mpc.x_sol().row(3).amax() < 1e-3);
}

#[test]
fn closed_loop_straightens_out_with_offset_rotation_centre() {
    let mut mpc = LateralMpc::new(Horizon::lateral()).unwrap();
    mpc.set_weights(1.0, 1.0, 1.0).unwrap();

    let x0 = dvector![0.0, -0.5, 0.05, 0.01];
    let x = closed_loop(&mut mpc, x0, 15.0, 1.5, 200);

    assert!(x[1].abs() < 0.1);
    assert!(x[2].abs() < 0.01);
    assert!(x[3].abs() < 1e-3);
    assert!(mpc.x_sol().row(3).amax() < 1e-3);
}

#[test]
fn config_overrides_reach_the_solver() {
    let mut config = LatMpcConfig::default();
    config.solver.nlp_solver_type = NlpSolverType::Sqp;
    config.solver.qp_solver_iter_max = 250;
    config.solver.sim_method_num_steps = 3;
    let mpc = LateralMpc::from_config(&config).unwrap();

    let options = mpc.solver().options();
    assert_eq!(NlpSolverType::Sqp, options.nlp_solver_type);
    assert_eq!(250, options.qp_solver_iter_max);
    assert_eq!(3, options.sim_method_num_steps);
    assert_eq!(Horizon::lateral().t_idxs(), &options.shooting_nodes[..]);
}
