use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use prelude::*;

use crate::{ModelDims, OcpError, OcpModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HessianApprox {
    GaussNewton,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegratorType {
    Erk,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NlpSolverType {
    /// One SQP iteration with a single QP solve per call
    SqpRti,
    /// SQP iterations until the step is below `nlp_solver_tol`
    Sqp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QpSolver {
    Osqp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub hessian_approx: HessianApprox,
    pub integrator_type: IntegratorType,
    pub sim_method_num_steps: usize,
    pub nlp_solver_type: NlpSolverType,
    pub nlp_solver_max_iter: usize,
    pub nlp_solver_tol: float,
    pub qp_solver: QpSolver,
    pub qp_solver_iter_max: u32,
    pub qp_solver_tol: float,
    pub qp_solver_polish: bool,
    pub qp_solver_warm_start: bool,
    pub tf: float,
    pub shooting_nodes: Vec<float>,
}

impl Default for SolverOptions {
    fn default() -> SolverOptions {
        SolverOptions {
            hessian_approx: HessianApprox::GaussNewton,
            integrator_type: IntegratorType::Erk,
            sim_method_num_steps: 1,
            nlp_solver_type: NlpSolverType::SqpRti,
            nlp_solver_max_iter: 100,
            nlp_solver_tol: 1e-6,
            qp_solver: QpSolver::Osqp,
            qp_solver_iter_max: 4000,
            qp_solver_tol: 1e-6,
            qp_solver_polish: true,
            qp_solver_warm_start: true,
            tf: 0.0,
            shooting_nodes: Vec::new(),
        }
    }
}

impl SolverOptions {
    /// Stage durations, one per shooting interval
    pub fn time_steps(&self) -> Vec<float> {
        self.shooting_nodes
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

/// Nonlinear least squares cost, the residuals are defined by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct OcpCost {
    pub W: Matrix<Dy, Dy>,
    pub W_e: Matrix<Dy, Dy>,
    pub yref: Vector<Dy>,
    pub yref_e: Vector<Dy>,
}

/// State bounds. `x0` pins every state of stage 0, `idxbx` applies to stages `1..N` and
/// `idxbx_e` to stage `N`.
#[derive(Clone, Debug, PartialEq)]
pub struct OcpConstraints {
    pub x0: Vector<Dy>,
    pub idxbx: Vec<usize>,
    pub lbx: Vector<Dy>,
    pub ubx: Vector<Dy>,
    pub idxbx_e: Vec<usize>,
    pub lbx_e: Vector<Dy>,
    pub ubx_e: Vector<Dy>,
}

pub struct OcpSpec {
    pub model: Box<dyn OcpModel>,
    pub N: usize,
    pub cost: OcpCost,
    pub constraints: OcpConstraints,
    pub parameter_values: Vector<Dy>,
    pub solver_options: SolverOptions,
}

fn invalid<T>(msg: String) -> Result<T, OcpError> {
    Err(OcpError::InvalidSpec(msg))
}

fn check_len(name: &str, v: &Vector<Dy>, len: usize) -> Result<(), OcpError> {
    if v.len() != len {
        return invalid(format!("{} has length {}, expected {}", name, v.len(), len));
    }
    Ok(())
}

fn check_square(name: &str, m: &Matrix<Dy, Dy>, n: usize) -> Result<(), OcpError> {
    if m.shape() != (n, n) {
        return invalid(format!("{} has shape {:?}, expected {:?}", name, m.shape(), (n, n)));
    }
    if !all_finite(m.iter()) {
        return invalid(format!("{} contains non-finite values", name));
    }
    Ok(())
}

fn check_box(
    name: &str,
    nx: usize,
    idx: &[usize],
    lb: &Vector<Dy>,
    ub: &Vector<Dy>,
) -> Result<(), OcpError> {
    if let Some(&i) = idx.iter().find(|&&i| i >= nx) {
        return invalid(format!("idxb{} contains {} but the model has {} states", name, i, nx));
    }
    if idx.iter().collect::<HashSet<_>>().len() != idx.len() {
        return invalid(format!("idxb{} contains duplicate indices", name));
    }
    check_len(&format!("lb{}", name), lb, idx.len())?;
    check_len(&format!("ub{}", name), ub, idx.len())?;
    if any_nan(lb.iter()) || any_nan(ub.iter()) {
        return invalid(format!("bounds on {} contain NaN", name));
    }
    if let Some(i) = (0..idx.len()).find(|&i| lb[i] > ub[i]) {
        return invalid(format!(
            "lb{0}[{1}] = {2} is above ub{0}[{1}] = {3}",
            name, i, lb[i], ub[i]
        ));
    }
    Ok(())
}

impl OcpSpec {
    pub fn dims(&self) -> ModelDims {
        self.model.dims()
    }

    /// Checks that every part of the problem agrees with the model dimensions and the horizon.
    pub fn validate(&self) -> Result<(), OcpError> {
        let ModelDims {
            nx,
            nu,
            np,
            ny,
            ny_e,
        } = self.dims();
        let N = self.N;
        let opts = &self.solver_options;

        if N == 0 {
            return invalid("N must be at least 1".to_string());
        }
        if nx == 0 || nu == 0 {
            return invalid(format!("model must have states and controls, got nx = {}, nu = {}", nx, nu));
        }

        let names = [
            ("state", self.model.state_names().len(), nx),
            ("control", self.model.control_names().len(), nu),
            ("parameter", self.model.parameter_names().len(), np),
        ];
        for (what, got, expected) in names {
            if got != expected {
                return invalid(format!("model names {} {}s but has {}", got, what, expected));
            }
        }

        // Timing
        if opts.shooting_nodes.len() != N + 1 {
            return invalid(format!(
                "shooting_nodes has {} entries, expected N + 1 = {}",
                opts.shooting_nodes.len(),
                N + 1
            ));
        }
        if !all_finite(&opts.shooting_nodes) {
            return invalid("shooting_nodes contains non-finite values".to_string());
        }
        if opts.time_steps().iter().any(|&dt| dt <= 0.0) {
            return invalid("shooting_nodes must be strictly increasing".to_string());
        }
        let span = opts.shooting_nodes[N] - opts.shooting_nodes[0];
        if (opts.tf - span).abs() > 1e-9 * span.max(1.0) {
            return invalid(format!("tf = {} does not match the shooting node span {}", opts.tf, span));
        }
        if opts.sim_method_num_steps == 0 {
            return invalid("sim_method_num_steps must be at least 1".to_string());
        }
        if opts.nlp_solver_max_iter == 0 || opts.qp_solver_iter_max == 0 {
            return invalid("iteration limits must be at least 1".to_string());
        }
        if !(opts.nlp_solver_tol > 0.0 && opts.qp_solver_tol > 0.0) {
            return invalid("solver tolerances must be positive".to_string());
        }

        // Cost
        check_square("W", &self.cost.W, ny)?;
        check_square("W_e", &self.cost.W_e, ny_e)?;
        check_len("yref", &self.cost.yref, ny)?;
        check_len("yref_e", &self.cost.yref_e, ny_e)?;
        if !all_finite(self.cost.yref.iter().chain(self.cost.yref_e.iter())) {
            return invalid("references contain non-finite values".to_string());
        }

        // Constraints
        let c = &self.constraints;
        check_len("x0", &c.x0, nx)?;
        if !all_finite(c.x0.iter()) {
            return invalid("x0 contains non-finite values".to_string());
        }
        check_box("x", nx, &c.idxbx, &c.lbx, &c.ubx)?;
        check_box("x_e", nx, &c.idxbx_e, &c.lbx_e, &c.ubx_e)?;

        check_len("parameter_values", &self.parameter_values, np)?;
        if !all_finite(self.parameter_values.iter()) {
            return invalid("parameter_values contains non-finite values".to_string());
        }

        Ok(())
    }

    /// Serializable summary of the formulation.
    pub fn describe(&self) -> OcpDescription {
        fn rows(m: &Matrix<Dy, Dy>) -> Vec<Vec<float>> {
            m.row_iter().map(|r| r.iter().cloned().collect()).collect()
        }
        fn values(v: &Vector<Dy>) -> Vec<float> {
            v.iter().cloned().collect()
        }
        fn names(n: &[&str]) -> Vec<String> {
            n.iter().map(|s| s.to_string()).collect()
        }

        let c = &self.constraints;
        OcpDescription {
            name: self.model.name().to_string(),
            dims: self.dims(),
            N: self.N,
            states: names(self.model.state_names()),
            controls: names(self.model.control_names()),
            parameters: names(self.model.parameter_names()),
            cost: CostDescription {
                cost_type: "NONLINEAR_LS",
                cost_type_e: "NONLINEAR_LS",
                W: rows(&self.cost.W),
                W_e: rows(&self.cost.W_e),
                yref: values(&self.cost.yref),
                yref_e: values(&self.cost.yref_e),
            },
            constraints: ConstraintDescription {
                x0: values(&c.x0),
                idxbx: c.idxbx.clone(),
                lbx: values(&c.lbx),
                ubx: values(&c.ubx),
                idxbx_e: c.idxbx_e.clone(),
                lbx_e: values(&c.lbx_e),
                ubx_e: values(&c.ubx_e),
            },
            parameter_values: values(&self.parameter_values),
            solver_options: self.solver_options.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CostDescription {
    pub cost_type: &'static str,
    pub cost_type_e: &'static str,
    pub W: Vec<Vec<float>>,
    pub W_e: Vec<Vec<float>>,
    pub yref: Vec<float>,
    pub yref_e: Vec<float>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConstraintDescription {
    pub x0: Vec<float>,
    pub idxbx: Vec<usize>,
    pub lbx: Vec<float>,
    pub ubx: Vec<float>,
    pub idxbx_e: Vec<usize>,
    pub lbx_e: Vec<float>,
    pub ubx_e: Vec<float>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OcpDescription {
    pub name: String,
    pub dims: ModelDims,
    pub N: usize,
    pub states: Vec<String>,
    pub controls: Vec<String>,
    pub parameters: Vec<String>,
    pub cost: CostDescription,
    pub constraints: ConstraintDescription,
    pub parameter_values: Vec<float>,
    pub solver_options: SolverOptions,
}
