use serde::Deserialize;
use std::fs;

use lateral_mpc::ConfigError;
use prelude::*;

static CONFIG_FILE: &str = "simulator.toml";

#[derive(Deserialize)]
pub struct SimulatorConfig {
    /// Simulated time
    pub t: float,
    /// Control period
    pub dt: float,
    pub real_time: bool,
    pub v_ego: float,
    pub rotation_radius: float,
    /// Initial `[x_ego, y_ego, psi_ego, curv_ego]` relative to the path
    pub x0: Vec<float>,
    pub integration_steps: usize,
}

impl SimulatorConfig {
    pub fn load() -> Result<SimulatorConfig, ConfigError> {
        let config_str = fs::read_to_string(CONFIG_FILE).map_err(|source| ConfigError::Io {
            path: CONFIG_FILE.to_string(),
            source,
        })?;
        toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
            path: CONFIG_FILE.to_string(),
            source,
        })
    }
}
