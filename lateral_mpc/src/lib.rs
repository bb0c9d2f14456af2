//! Lateral path tracking MPC for a road vehicle.
//!
//! A kinematic model in path relative coordinates is steered through the rate of change of
//! curvature so that the lateral offset and heading follow a reference sampled on a non-uniform
//! time horizon. One real-time iteration is solved per control cycle.
// Ignore this lint otherwise many warnings are generated for common mathematical notation
#![allow(non_snake_case)]

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate approx;

mod builder;
pub use builder::{gen_lat_model, gen_lat_mpc_spec, MAX_CURVATURE, MAX_HEADING};

mod config;
pub use config::{ConfigError, LatMpcConfig, SolverConfig, Weights};

mod controller;
pub use controller::{LateralMpc, TERMINAL_WEIGHT_RATIO};

mod error;
pub use error::LatMpcError;

pub mod horizon;
pub use horizon::Horizon;

pub mod model;
pub use model::LateralModel;

pub use ocp::{SolveStatus, SolveStats};

/// Name of the formulation description written by `lat_mpc_gen`
pub const OCP_DESCRIPTION_FILE: &str = "lat_mpc_ocp.json";
