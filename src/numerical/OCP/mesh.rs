//! # Mesh refinement
//!
//! The driver runs the solve as a sequence of stages. A stage is built from an
//! immutable snapshot (node counts and one guess per phase), transcribed into a
//! fresh [`DiscreteNlp`], scaled, solved and extracted. The next snapshot comes
//! from the extracted solution:
//! - manual policy: the next entry of each phase's node sequence (phases with a
//!   shorter sequence keep their last entry);
//! - automatic policy: phases whose ODE error estimate exceeds `ode_tolerance` get
//!   1.5 times more nodes, capped by `mr_max_nodes`, for at most
//!   `mr_max_iterations` stages.
//!
//! A stage that does not converge ends the run; its trajectories are returned with
//! the error flag of the solution set.
use crate::numerical::OCP::algorithm::{Algorithm, CollocationMethod, MeshRefinement};
use crate::numerical::OCP::ocp_errors::OcpResult;
use crate::numerical::OCP::problem::{Guess, Problem};
use crate::numerical::OCP::scaling::{ScaledNlp, ScalingFactors};
use crate::numerical::OCP::solution::{MeshStageStats, PhaseSolution, Solution, extract_phases};
use crate::numerical::OCP::transcription::DiscreteNlp;
use crate::numerical::optimization::interior_point::{SolverStatus, solve_nlp};
use crate::numerical::optimization::nlp_problem::{NlpProblem, bound_violation};
use crate::Utils::timer::SolveTimer;
use log::{error, info, warn};
use nalgebra::DVector;
use std::time::Instant;

/// growth factor of the node count in automatic refinement
const NODE_GROWTH: f64 = 1.5;

/// Snapshot a stage is built from.
#[derive(Debug, Clone)]
pub struct MeshSnapshot {
    pub stage: usize,
    pub nodes: Vec<usize>,
    pub guesses: Vec<Guess>,
    pub warm_start: bool,
}

/// Result of one stage.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub phases: Vec<PhaseSolution>,
    pub status: SolverStatus,
    pub message: String,
    /// per phase, only for converged stages
    pub ode_errors: Option<Vec<f64>>,
    pub stats: MeshStageStats,
}

enum MeshState {
    Solve(MeshSnapshot),
    Finished(StageOutcome),
}

/// Node counts of the stage after `stage` in the manual policy, None when every
/// sequence is exhausted.
pub fn manual_next(sequences: &[Vec<usize>], stage: usize) -> Option<Vec<usize>> {
    let next = stage + 1;
    if sequences.iter().all(|s| next >= s.len()) {
        return None;
    }
    Some(
        sequences
            .iter()
            .map(|s| s[next.min(s.len() - 1)])
            .collect(),
    )
}

/// Node counts after an automatic stage, None when every phase meets the
/// tolerance or no phase can grow anymore.
pub fn automatic_next(
    nodes: &[usize],
    errors: &[f64],
    tolerance: f64,
    max_nodes: usize,
) -> Option<Vec<usize>> {
    if errors.iter().all(|&e| e <= tolerance) {
        return None;
    }
    let next: Vec<usize> = nodes
        .iter()
        .zip(errors.iter())
        .map(|(&n, &e)| {
            if e > tolerance {
                ((n as f64 * NODE_GROWTH).ceil() as usize).min(max_nodes).max(n)
            } else {
                n
            }
        })
        .collect();
    if next == nodes { None } else { Some(next) }
}

/// Relative ODE error of every phase at the interval midpoints, checked with
/// Simpson's rule, `|x_{k+1} − x_k − Δτ/6 (h_k + 4 h_m + h_{k+1})| / (1 + max|x|)`.
///
/// Legendre states and controls are interpolated with the collocation polynomial.
/// Trapezoidal controls are interpolated linearly and states with the cubic Hermite
/// midpoint `(x_k + x_{k+1})/2 + Δτ/8 (h_k − h_{k+1})`; a linear state would make the
/// Simpson check coincide with the trapezoidal defect for linear dynamics and
/// report zero.
pub fn estimate_ode_errors(nlp: &DiscreteNlp, x: &DVector<f64>) -> OcpResult<Vec<f64>> {
    let mut errors = Vec::with_capacity(nlp.phases.len());
    for (ph, block) in nlp.phases.iter().enumerate() {
        let lay = &block.layout;
        let d = lay.dims;
        let (ns, nc) = (d.nstates, d.ncontrols);
        let n = lay.nnodes;
        let outputs = nlp.node_outputs(ph, x)?;
        let series = |global_of: &dyn Fn(usize) -> usize| -> Vec<f64> {
            (0..n).map(|k| x[global_of(k)]).collect()
        };
        let states: Vec<Vec<f64>> = (0..ns)
            .map(|i| series(&|k| lay.global(lay.state(k, i))))
            .collect();
        let controls: Vec<Vec<f64>> = (0..nc)
            .map(|j| series(&|k| lay.global(lay.control(k, j))))
            .collect();
        let magnitude: Vec<f64> = states
            .iter()
            .map(|s| 1.0 + s.iter().fold(0.0_f64, |m, v| m.max(v.abs())))
            .collect();
        let mut worst: f64 = 0.0;
        for k in 0..n - 1 {
            let (ta, tb) = (block.coll.tau[k], block.coll.tau[k + 1]);
            let dtau = tb - ta;
            let tau_m = 0.5 * (ta + tb);
            // local node inputs at the midpoint: [x, u, p, t0, tf]
            let mut point = block.node_point(x, k);
            for i in 0..ns {
                point[i] = match block.coll.method {
                    CollocationMethod::Legendre => block.coll.interpolate(&states[i], tau_m),
                    CollocationMethod::Trapezoidal => {
                        0.5 * (states[i][k] + states[i][k + 1])
                            + dtau / 8.0 * (outputs[k][i] - outputs[k + 1][i])
                    }
                };
            }
            for j in 0..nc {
                point[ns + j] = block.coll.interpolate(&controls[j], tau_m);
            }
            let mid = nlp.node_outputs_at(ph, tau_m, &point)?;
            for i in 0..ns {
                let increment = dtau / 6.0 * (outputs[k][i] + 4.0 * mid[i] + outputs[k + 1][i]);
                let residual = states[i][k + 1] - states[i][k] - increment;
                worst = worst.max(residual.abs() / magnitude[i]);
            }
        }
        errors.push(worst);
    }
    Ok(errors)
}

pub struct MeshDriver<'p> {
    problem: &'p Problem,
    algorithm: &'p Algorithm,
}

impl<'p> MeshDriver<'p> {
    pub fn new(problem: &'p Problem, algorithm: &'p Algorithm) -> Self {
        MeshDriver { problem, algorithm }
    }

    fn first_snapshot(&self) -> OcpResult<MeshSnapshot> {
        let nodes = self.problem.phases.iter().map(|p| p.nodes[0]).collect();
        let guesses = self
            .problem
            .phases
            .iter()
            .map(|p| p.initial_guess())
            .collect::<OcpResult<Vec<_>>>()?;
        Ok(MeshSnapshot {
            stage: 0,
            nodes,
            guesses,
            warm_start: self.problem.warm_started,
        })
    }

    /// Transcribe, scale, solve and extract one stage.
    pub fn solve_stage(
        &self,
        snapshot: &MeshSnapshot,
        timer: &mut SolveTimer,
    ) -> OcpResult<StageOutcome> {
        let stage_start = Instant::now();
        let alg = self.algorithm;
        info!(
            "mesh stage {}: nodes {:?}{}",
            snapshot.stage,
            snapshot.nodes,
            if snapshot.warm_start { " (warm start)" } else { "" }
        );
        // STEP 1: TRANSCRIPTION AND SCALING
        timer.transcription_tic();
        let nlp = DiscreteNlp::new(self.problem, alg, &snapshot.nodes, &snapshot.guesses)?;
        let factors = ScalingFactors::for_stage(alg.scaling, self.problem, &nlp)?;
        let scaled = ScaledNlp::new(&nlp, factors)?;
        timer.transcription_tac();
        // STEP 2: NLP SOLVE
        timer.nlp_tic();
        let result = solve_nlp(&scaled, alg.interior_point_options(snapshot.warm_start))?;
        timer.nlp_tac();
        // STEP 3: EXTRACTION
        timer.extraction_tic();
        let x = scaled.unscale_point(&result.x);
        let lambda = scaled.unscale_multipliers(&result.lambda);
        let phases = extract_phases(&nlp, &x, &lambda, alg.collocation)?;
        let (objective, constraint_violation) = match nlp.eval_values(&x) {
            Ok((f, g)) => (f, bound_violation(&nlp.bounds(), &x, &g)),
            Err(e) if !result.status.is_success() => {
                error!("stage {}: {}", snapshot.stage, e);
                (f64::NAN, f64::INFINITY)
            }
            Err(e) => return Err(e),
        };
        let ode_errors = if result.status.is_success() {
            Some(estimate_ode_errors(&nlp, &x)?)
        } else {
            None
        };
        timer.extraction_tac();
        let ode_error = ode_errors
            .as_ref()
            .map(|e| e.iter().fold(0.0_f64, |m, v| m.max(*v)));
        let stats = MeshStageStats {
            stage: snapshot.stage,
            nodes: snapshot.nodes.clone(),
            status: result.status,
            iterations: result.iterations,
            objective,
            constraint_violation,
            ode_error,
            cpu_time: stage_start.elapsed(),
        };
        info!(
            "mesh stage {} finished: {}, {} iterations, objective {:.8e}, violation {:.3e}",
            snapshot.stage, result.status, result.iterations, objective, constraint_violation
        );
        Ok(StageOutcome {
            phases,
            status: result.status,
            message: result.message,
            ode_errors,
            stats,
        })
    }

    /// snapshot of the stage after a converged one, None when the run is over
    fn next_snapshot(&self, snapshot: &MeshSnapshot, outcome: &StageOutcome) -> Option<MeshSnapshot> {
        let alg = self.algorithm;
        let nodes = match alg.mesh_refinement {
            MeshRefinement::Manual => {
                let sequences: Vec<Vec<usize>> =
                    self.problem.phases.iter().map(|p| p.nodes.clone()).collect();
                manual_next(&sequences, snapshot.stage)?
            }
            MeshRefinement::Automatic => {
                let errors = outcome.ode_errors.as_ref()?;
                if snapshot.stage + 1 >= alg.mr_max_iterations {
                    if errors.iter().any(|&e| e > alg.ode_tolerance) {
                        warn!(
                            "mesh refinement stopped after {} stages with ODE errors {:?}",
                            snapshot.stage + 1,
                            errors
                        );
                    }
                    return None;
                }
                let next =
                    automatic_next(&snapshot.nodes, errors, alg.ode_tolerance, alg.mr_max_nodes);
                if next.is_none() && errors.iter().any(|&e| e > alg.ode_tolerance) {
                    warn!(
                        "node cap {} reached before the ODE tolerance {:e}",
                        alg.mr_max_nodes, alg.ode_tolerance
                    );
                }
                next?
            }
        };
        Some(MeshSnapshot {
            stage: snapshot.stage + 1,
            nodes,
            guesses: outcome.phases.iter().map(|p| p.as_guess()).collect(),
            warm_start: true,
        })
    }

    /// Run every stage and assemble the solution.
    pub fn run(&self, timer: &mut SolveTimer) -> OcpResult<Solution> {
        let start = Instant::now();
        let mut history = Vec::new();
        let mut state = MeshState::Solve(self.first_snapshot()?);
        let last = loop {
            match state {
                MeshState::Solve(snapshot) => {
                    let outcome = self.solve_stage(&snapshot, timer)?;
                    history.push(outcome.stats.clone());
                    if !outcome.status.is_success() {
                        warn!(
                            "mesh stage {} did not converge ({}), remaining stages skipped",
                            snapshot.stage, outcome.status
                        );
                        state = MeshState::Finished(outcome);
                        continue;
                    }
                    state = match self.next_snapshot(&snapshot, &outcome) {
                        Some(next) => MeshState::Solve(next),
                        None => MeshState::Finished(outcome),
                    };
                }
                MeshState::Finished(outcome) => break outcome,
            }
        };
        let error_flag = !last.status.is_success();
        Ok(Solution {
            problem_name: self.problem.name.clone(),
            phases: last.phases,
            status: last.status,
            error_flag,
            error_message: if error_flag { Some(last.message) } else { None },
            iterations: last.stats.iterations,
            objective: last.stats.objective,
            constraint_violation: last.stats.constraint_violation,
            mesh_history: history,
            total_time: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Ad;
    use crate::numerical::OCP::callbacks::{FunctionSet, NodeArgs};
    use crate::numerical::OCP::problem::PhaseDimensions;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn manual_sequences_keep_their_last_entry() {
        let seqs = vec![vec![10, 20, 40], vec![15]];
        assert_eq!(manual_next(&seqs, 0), Some(vec![20, 15]));
        assert_eq!(manual_next(&seqs, 1), Some(vec![40, 15]));
        assert_eq!(manual_next(&seqs, 2), None);
    }

    #[test]
    fn automatic_growth_only_where_needed() {
        assert_eq!(automatic_next(&[10, 10], &[1e-2, 1e-5], 1e-3, 100), Some(vec![15, 10]));
        assert_eq!(automatic_next(&[10, 10], &[1e-4, 1e-5], 1e-3, 100), None);
        assert_eq!(automatic_next(&[90], &[1.0], 1e-3, 100), Some(vec![100]));
        assert_eq!(automatic_next(&[100], &[1.0], 1e-3, 100), None);
    }

    /// x' = x on [0, 1]
    fn growth_problem() -> Problem {
        let mut problem = Problem::new("growth");
        problem.level1_setup(1, 0).unwrap();
        let phase = problem.phase_mut(0).unwrap();
        phase
            .declare(PhaseDimensions {
                nstates: 1,
                ..Default::default()
            })
            .unwrap();
        phase.set_nodes(vec![12]).unwrap();
        phase.set_start_time_bounds(0.0, 0.0).unwrap();
        phase.set_end_time_bounds(1.0, 1.0).unwrap();
        problem.set_functions(Box::new(FunctionSet::new(
            |n: &NodeArgs, d: &mut [Ad], _: &mut [Ad], _| {
                d[0] = n.states[0].clone();
            },
        )));
        problem
    }

    fn guess(values: impl Fn(f64) -> f64) -> Guess {
        let time: Vec<f64> = (0..=200).map(|i| i as f64 / 200.0).collect();
        let states = DMatrix::from_fn(1, time.len(), |_, k| values(time[k]));
        Guess {
            time: DVector::from_vec(time),
            states,
            controls: DMatrix::zeros(0, 201),
            parameters: DVector::zeros(0),
        }
    }

    #[test]
    fn ode_error_is_small_for_the_exact_trajectory() {
        let problem = growth_problem();
        for (method, tol) in [
            (CollocationMethod::Legendre, 1e-4),
            (CollocationMethod::Trapezoidal, 1e-2),
        ] {
            let algorithm = Algorithm {
                collocation: method,
                ..Algorithm::default()
            };
            let nlp = DiscreteNlp::new(&problem, &algorithm, &[12], &[guess(f64::exp)]).unwrap();
            let exact = estimate_ode_errors(&nlp, &nlp.initial_point()).unwrap();
            assert!(exact[0] < tol, "{:?}: {}", method, exact[0]);
            let nlp = DiscreteNlp::new(&problem, &algorithm, &[12], &[guess(|_| 1.0)]).unwrap();
            let wrong = estimate_ode_errors(&nlp, &nlp.initial_point()).unwrap();
            assert!(wrong[0] > 1e-2, "{:?}: {}", method, wrong[0]);
        }
    }

    #[test]
    fn trapezoidal_solution_of_linear_dynamics_has_a_nonzero_error() {
        let problem = growth_problem();
        let algorithm = Algorithm {
            collocation: CollocationMethod::Trapezoidal,
            ..Algorithm::default()
        };
        let nlp = DiscreteNlp::new(&problem, &algorithm, &[5], &[guess(f64::exp)]).unwrap();
        // dx/dτ = a x with a = (tf − t0)/2; the trapezoidal defects vanish for
        // x_{k+1} = r x_k
        let (a, dtau): (f64, f64) = (0.5, 0.5);
        let r = (1.0 + 0.5 * a * dtau) / (1.0 - 0.5 * a * dtau);
        let lay = nlp.phases[0].layout;
        let mut x = nlp.initial_point();
        for k in 0..5 {
            x[lay.global(lay.state(k, 0))] = r.powi(k as i32);
        }
        let errors = estimate_ode_errors(&nlp, &x).unwrap();
        // with the Hermite midpoint the Simpson residual is a² Δτ² (x_{k+1} − x_k) / 12,
        // largest on the last interval
        let expected = a * a * dtau * dtau / 12.0 * (r.powi(4) - r.powi(3)) / (1.0 + r.powi(4));
        assert_relative_eq!(errors[0], expected, epsilon = 1e-12, max_relative = 1e-9);
        assert!(errors[0] > 1e-4);
    }
}
