use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use ocp::{NlpSolverType, SolverOptions};
use prelude::*;

use crate::horizon::LAT_MPC_N;

static CONFIG_FILE: &str = "lat_mpc.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to deserialise {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatMpcConfig {
    #[serde(default = "default_N")]
    pub N: usize,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub solver: SolverConfig,
}

fn default_N() -> usize {
    LAT_MPC_N
}

impl Default for LatMpcConfig {
    fn default() -> LatMpcConfig {
        LatMpcConfig {
            N: LAT_MPC_N,
            weights: Weights::default(),
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub path: float,
    pub heading: float,
    pub steer_rate: float,
}

impl Default for Weights {
    fn default() -> Weights {
        Weights {
            path: 1.0,
            heading: 1.0,
            steer_rate: 1.0,
        }
    }
}

/// Solver settings that may be overridden for the lateral problem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub nlp_solver_type: NlpSolverType,
    pub qp_solver_iter_max: u32,
    pub qp_solver_tol: float,
    pub sim_method_num_steps: usize,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig::from(&SolverOptions::default())
    }
}

impl<'a> From<&'a SolverOptions> for SolverConfig {
    fn from(options: &'a SolverOptions) -> SolverConfig {
        SolverConfig {
            nlp_solver_type: options.nlp_solver_type,
            qp_solver_iter_max: options.qp_solver_iter_max,
            qp_solver_tol: options.qp_solver_tol,
            sim_method_num_steps: options.sim_method_num_steps,
        }
    }
}

impl SolverConfig {
    pub fn apply(&self, options: &mut SolverOptions) {
        options.nlp_solver_type = self.nlp_solver_type;
        options.qp_solver_iter_max = self.qp_solver_iter_max;
        options.qp_solver_tol = self.qp_solver_tol;
        options.sim_method_num_steps = self.sim_method_num_steps;
    }
}

impl LatMpcConfig {
    pub fn load() -> Result<LatMpcConfig, ConfigError> {
        LatMpcConfig::load_from(CONFIG_FILE)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<LatMpcConfig, ConfigError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
