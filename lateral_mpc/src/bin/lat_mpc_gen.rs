//! Writes the JSON description of the lateral MPC formulation.
//!
//! Usage: `lat_mpc_gen [export_dir] [config]`, defaulting to `lat_mpc_export` and `lat_mpc.toml`.

#[macro_use]
extern crate log;

use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;

use lateral_mpc::{gen_lat_mpc_spec, ConfigError, Horizon, LatMpcConfig, OCP_DESCRIPTION_FILE};

static DEFAULT_EXPORT_DIR: &str = "lat_mpc_export";

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let export_dir = args.next().unwrap_or_else(|| DEFAULT_EXPORT_DIR.to_string());
    let config_path = args.next();

    if let Err(e) = run(Path::new(&export_dir), config_path.as_deref()) {
        error!("{}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<LatMpcConfig, ConfigError> {
    match path {
        Some(path) => LatMpcConfig::load_from(path),
        None => match LatMpcConfig::load() {
            Err(ConfigError::Io { path, .. }) => {
                warn!("{} not found, using the reference configuration", path);
                Ok(LatMpcConfig::default())
            }
            res => res,
        },
    }
}

fn run(export_dir: &Path, config_path: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    let horizon = Horizon::lateral_n(config.N)?;

    let spec = gen_lat_mpc_spec(&horizon, &config.solver);
    spec.validate()?;

    fs::create_dir_all(export_dir)?;
    let path = export_dir.join(OCP_DESCRIPTION_FILE);
    fs::write(&path, serde_json::to_string_pretty(&spec.describe())?)?;

    info!(
        "wrote {} (N = {}, tf = {} s)",
        path.display(),
        horizon.N(),
        horizon.tf()
    );
    Ok(())
}
