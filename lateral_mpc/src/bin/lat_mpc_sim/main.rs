//! Closed loop simulation of the lateral MPC against its own model.
//!
//! Reads `simulator.toml` and `lat_mpc.toml` from the working directory and writes
//! `flame-graph.txt` on exit.

// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

#[macro_use]
extern crate log;

mod config;
mod flame_merge;

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use lateral_mpc::model::{NU, NX};
use lateral_mpc::{ConfigError, LatMpcConfig, LateralModel, LateralMpc};
use ocp::erk;
use prelude::nalgebra::dvector;
use prelude::*;
use stats::{MinMax, OnlineStats};

use config::SimulatorConfig;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("simulation failed: {}", e);
    }

    if let Err(e) = flame_merge::write_flame("flame-graph.txt") {
        error!("unable to write flame graph: {}", e);
    }
}

fn load_mpc_config() -> Result<LatMpcConfig, ConfigError> {
    match LatMpcConfig::load() {
        Err(ConfigError::Io { path, .. }) => {
            warn!("{} not found, using the reference configuration", path);
            Ok(LatMpcConfig::default())
        }
        res => res,
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let sim = SimulatorConfig::load()?;
    if sim.x0.len() != NX {
        return Err(format!("x0 must have {} elements, got {}", NX, sim.x0.len()).into());
    }
    if !(sim.dt > 0.0) || sim.integration_steps == 0 {
        return Err("dt and integration_steps must be positive".into());
    }

    let mut mpc = LateralMpc::from_config(&load_mpc_config()?)?;
    let N = mpc.horizon().N();

    // Follow the path itself, the reference is zero offset and heading
    let y_pts = vec![0.0; N + 1];
    let heading_pts = vec![0.0; N + 1];

    let p = dvector![sim.v_ego, sim.rotation_radius];
    let period = Duration::from_secs_f64(sim.dt);
    let n_steps = (sim.t / sim.dt) as usize;

    let mut x = Vector::<Dy>::from_iterator(NX, sim.x0.iter().cloned());
    let mut solve_stats = OnlineStats::new();
    let mut solve_range = MinMax::new();
    let mut deadline_misses = 0;
    let mut degraded = 0;

    for i in 0..n_steps {
        let start = Instant::now();

        // The path relative frame moves with the vehicle
        x[0] = 0.0;
        let status = mpc.run(x.as_slice(), sim.v_ego, sim.rotation_radius, &y_pts, &heading_pts)?;

        let elapsed = start.elapsed();
        let millis = elapsed.as_secs_f64() * 1000.0;
        solve_stats.add(millis);
        solve_range.add(millis);

        if !status.is_success() {
            degraded += 1;
        }
        if elapsed > period {
            deadline_misses += 1;
            warn!("cycle {} missed its deadline: {:.3} ms", i, millis);
        }

        let u = Vector::<Dy>::from_element(NU, mpc.u_sol()[(0, 0)]);
        x = erk::integrate(&LateralModel, sim.dt, sim.integration_steps, &x, &u, &p);

        info!("Controller took {:.3} ms ({:?})", millis, status);
        info!(
            "t = {:.2} s, y = {:.4}, psi = {:.4}, curv = {:.5}, curv_rate = {:.5}",
            (i + 1) as float * sim.dt,
            x[1],
            x[2],
            x[3],
            u[0]
        );

        if sim.real_time && elapsed < period {
            thread::sleep(period - elapsed);
        }
    }

    println!("Solve time stats (mean/ms, stdev/ms): {:?}", solve_stats);
    if let Some(max) = solve_range.max() {
        println!("{} cycles, slowest solve {:.3} ms", solve_range.len(), max);
    }
    println!(
        "{} deadline misses, {} degraded solves, final state {:?}",
        deadline_misses,
        degraded,
        x.as_slice()
    );

    Ok(())
}
