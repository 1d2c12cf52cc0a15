//! Entry point of the optimal control engine.
//!
//! # Example
//! ```rust,ignore
//! use RustedOCP::numerical::OCP::{algorithm::Algorithm, ocp_solver::solve_ocp};
//! let solution = solve_ocp(&problem, &Algorithm::default())?;
//! let x = solution.get_states_in_phase(0)?;
//! let t = solution.get_time_in_phase(0)?;
//! ```
use crate::numerical::OCP::algorithm::Algorithm;
use crate::numerical::OCP::mesh::MeshDriver;
use crate::numerical::OCP::ocp_errors::OcpResult;
use crate::numerical::OCP::problem::Problem;
use crate::numerical::OCP::solution::Solution;
use crate::Utils::logger::setup_logging;
use crate::Utils::timer::{SolveTimer, key_value_table};
use log::{error, info};

/// Solve `problem` with the options of `algorithm`.
///
/// Configuration problems come back as `Err` before anything is solved. A run that
/// does not converge (iteration limit, infeasibility, numerical breakdown inside
/// the solver) still returns the best-effort [`Solution`] with its error flag set.
pub fn solve_ocp(problem: &Problem, algorithm: &Algorithm) -> OcpResult<Solution> {
    setup_logging(algorithm.loglevel.as_deref(), "optimal control solver")?;
    algorithm.validate()?;
    problem.validate()?;
    info!(
        "solving '{}': {} phases, {} linkages, {} collocation, {} derivatives, {} hessian",
        problem.name,
        problem.nphases(),
        problem.nlinkages,
        algorithm.collocation,
        algorithm.derivatives,
        algorithm.hessian
    );
    let mut timer = SolveTimer::new();
    let solution = MeshDriver::new(problem, algorithm).run(&mut timer)?;
    info!("\n{}", solution.mesh_table());
    let mut rows = vec![
        ("problem".to_string(), solution.problem_name.clone()),
        ("status".to_string(), solution.status.to_string()),
        ("objective".to_string(), format!("{:.10e}", solution.objective)),
        (
            "constraint violation".to_string(),
            format!("{:.3e}", solution.constraint_violation),
        ),
        ("NLP iterations".to_string(), solution.iterations.to_string()),
    ];
    rows.extend(timer.rows());
    info!("CALC STATISTICS \n{}", key_value_table(&rows));
    if solution.error_flag {
        error!(
            "'{}' did not converge: {}",
            problem.name,
            solution.error_message.as_deref().unwrap_or("no message")
        );
    }
    Ok(solution)
}
