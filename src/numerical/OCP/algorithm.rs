//! Algorithm options of the optimal control engine.
//!
//! Options can be set field by field on [`Algorithm::default()`] or read from a
//! TOML table with [`Algorithm::from_toml_str`]:
//! ```toml
//! nlp_method = "ipopt"
//! scaling = "automatic"
//! derivatives = "automatic"
//! hessian = "exact"
//! collocation = "Legendre"
//! mesh_refinement = "manual"
//! nlp_iter_max = 1000
//! nlp_tolerance = 1e-6
//! ode_tolerance = 1e-3
//! loglevel = "info"
//! ```
use crate::autodiff::DerivativeMethod;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::optimization::interior_point::{HessianApproximation, InteriorPointOptions};
use crate::somelinalg::kkt_solvers::LinearSolverKind;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum ScalingMode {
    #[strum(serialize = "none")]
    None,
    /// user factors from `Phase::set_scaling`
    #[strum(serialize = "manual", serialize = "user")]
    Manual,
    /// from variable and constraint bounds
    #[strum(serialize = "automatic", serialize = "auto")]
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum NlpMethod {
    #[strum(to_string = "ipopt", serialize = "interior-point", serialize = "interior_point")]
    InteriorPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum CollocationMethod {
    /// Legendre-Gauss-Lobatto pseudospectral
    #[strum(to_string = "Legendre", serialize = "lgl", serialize = "pseudospectral")]
    Legendre,
    #[strum(to_string = "trapezoidal", serialize = "trapezoid")]
    Trapezoidal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum MeshRefinement {
    /// run through the node sequence given for each phase
    #[strum(serialize = "manual")]
    Manual,
    /// grow the node count until the ODE error estimate meets `ode_tolerance`
    #[strum(serialize = "automatic", serialize = "auto")]
    Automatic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Algorithm {
    pub nlp_method: NlpMethod,
    pub scaling: ScalingMode,
    pub derivatives: DerivativeMethod,
    pub hessian: HessianApproximation,
    pub collocation: CollocationMethod,
    pub mesh_refinement: MeshRefinement,
    pub linear_solver: LinearSolverKind,
    pub nlp_iter_max: usize,
    pub nlp_tolerance: f64,
    pub ode_tolerance: f64,  // relative ODE error target of automatic refinement
    pub mr_max_iterations: usize, // stages of automatic refinement
    pub mr_max_nodes: usize, // node cap of automatic refinement
    pub parallel: bool,      // evaluate collocation nodes on the rayon pool
    pub loglevel: Option<String>,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm {
            nlp_method: NlpMethod::InteriorPoint,
            scaling: ScalingMode::Automatic,
            derivatives: DerivativeMethod::Automatic,
            hessian: HessianApproximation::Exact,
            collocation: CollocationMethod::Legendre,
            mesh_refinement: MeshRefinement::Manual,
            linear_solver: LinearSolverKind::SparseLu,
            nlp_iter_max: 1000,
            nlp_tolerance: 1e-6,
            ode_tolerance: 1e-3,
            mr_max_iterations: 7,
            mr_max_nodes: 150,
            parallel: false,
            loglevel: Some("info".to_string()),
        }
    }
}

fn parse_option<T: FromStr>(key: &str, value: &toml::Value) -> OcpResult<T> {
    let s = value
        .as_str()
        .ok_or_else(|| OcpError::config(format!("option {} must be a string", key)))?;
    T::from_str(s).map_err(|_| OcpError::config(format!("unknown value '{}' for option {}", s, key)))
}

fn parse_count(key: &str, value: &toml::Value) -> OcpResult<usize> {
    match value.as_integer() {
        Some(n) if n > 0 => Ok(n as usize),
        _ => Err(OcpError::config(format!(
            "option {} must be a positive integer",
            key
        ))),
    }
}

fn parse_positive(key: &str, value: &toml::Value) -> OcpResult<f64> {
    let v = match value {
        toml::Value::Float(f) => *f,
        toml::Value::Integer(i) => *i as f64,
        _ => {
            return Err(OcpError::config(format!("option {} must be a number", key)));
        }
    };
    if !(v.is_finite() && v > 0.0) {
        return Err(OcpError::config(format!("option {} must be positive", key)));
    }
    Ok(v)
}

impl Algorithm {
    /// Read options from a TOML table. Missing keys keep their defaults, unknown
    /// keys and malformed values are configuration errors.
    pub fn from_toml_str(source: &str) -> OcpResult<Self> {
        let table: toml::Table = source
            .parse()
            .map_err(|e: toml::de::Error| OcpError::config(format!("invalid TOML: {}", e)))?;
        let mut alg = Algorithm::default();
        for (key, value) in table.iter() {
            match key.as_str() {
                "nlp_method" => alg.nlp_method = parse_option(key, value)?,
                "scaling" => alg.scaling = parse_option(key, value)?,
                "derivatives" => alg.derivatives = parse_option(key, value)?,
                "hessian" => alg.hessian = parse_option(key, value)?,
                "collocation" => alg.collocation = parse_option(key, value)?,
                "mesh_refinement" => alg.mesh_refinement = parse_option(key, value)?,
                "linear_solver" => alg.linear_solver = parse_option(key, value)?,
                "nlp_iter_max" => alg.nlp_iter_max = parse_count(key, value)?,
                "mr_max_iterations" => alg.mr_max_iterations = parse_count(key, value)?,
                "mr_max_nodes" => alg.mr_max_nodes = parse_count(key, value)?,
                "nlp_tolerance" => alg.nlp_tolerance = parse_positive(key, value)?,
                "ode_tolerance" => alg.ode_tolerance = parse_positive(key, value)?,
                "parallel" => {
                    alg.parallel = value.as_bool().ok_or_else(|| {
                        OcpError::config("option parallel must be a boolean")
                    })?
                }
                "loglevel" => {
                    let level = value
                        .as_str()
                        .ok_or_else(|| OcpError::config("option loglevel must be a string"))?;
                    alg.loglevel = Some(level.to_string());
                }
                other => {
                    return Err(OcpError::config(format!("unknown option '{}'", other)));
                }
            }
        }
        alg.validate()?;
        Ok(alg)
    }

    pub fn validate(&self) -> OcpResult<()> {
        if self.nlp_iter_max == 0 {
            return Err(OcpError::config("nlp_iter_max must be positive"));
        }
        if !(self.nlp_tolerance.is_finite() && self.nlp_tolerance > 0.0) {
            return Err(OcpError::config("nlp_tolerance must be positive"));
        }
        if !(self.ode_tolerance.is_finite() && self.ode_tolerance > 0.0) {
            return Err(OcpError::config("ode_tolerance must be positive"));
        }
        if self.mr_max_nodes < 2 {
            return Err(OcpError::config("mr_max_nodes must be at least 2"));
        }
        Ok(())
    }

    /// interior point options of one mesh stage
    pub fn interior_point_options(&self, warm_start: bool) -> InteriorPointOptions {
        InteriorPointOptions {
            tol: self.nlp_tolerance,
            max_iter: self.nlp_iter_max,
            warm_start,
            linear_solver: self.linear_solver,
            hessian: self.hessian,
            ..InteriorPointOptions::default()
        }
    }
}
