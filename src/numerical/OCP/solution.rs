//! Solution of an optimal control problem and its extraction from the NLP unknowns.
//!
//! Trajectories are returned at the collocation nodes of the last mesh stage, one
//! row per component and one column per node. Costates are estimated from the
//! defect multipliers for the Legendre scheme only.
use crate::numerical::OCP::algorithm::CollocationMethod;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::OCP::problem::Guess;
use crate::numerical::OCP::transcription::DiscreteNlp;
use crate::numerical::optimization::interior_point::SolverStatus;
use crate::Utils::timer::records_table;
use log::warn;
use nalgebra::{DMatrix, DVector};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSolution {
    pub time: DVector<f64>,
    pub states: DMatrix<f64>,
    pub controls: DMatrix<f64>,
    pub parameters: DVector<f64>,
    pub integrals: DVector<f64>,
    pub costates: Option<DMatrix<f64>>,
    /// path constraint values at the nodes
    pub path: DMatrix<f64>,
    pub events: DVector<f64>,
}

impl PhaseSolution {
    pub fn nnodes(&self) -> usize {
        self.time.len()
    }

    pub fn start_time(&self) -> f64 {
        self.time[0]
    }

    pub fn end_time(&self) -> f64 {
        self.time[self.time.len() - 1]
    }

    /// the trajectories as the guess of a later solve
    pub fn as_guess(&self) -> Guess {
        Guess {
            time: self.time.clone(),
            states: self.states.clone(),
            controls: self.controls.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Diagnostics of one mesh stage.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshStageStats {
    pub stage: usize,
    pub nodes: Vec<usize>,
    pub status: SolverStatus,
    pub iterations: usize,
    pub objective: f64,
    pub constraint_violation: f64,
    /// max relative ODE error estimate, when computed
    pub ode_error: Option<f64>,
    pub cpu_time: Duration,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub problem_name: String,
    pub phases: Vec<PhaseSolution>,
    pub status: SolverStatus,
    /// set whenever the last stage did not converge
    pub error_flag: bool,
    pub error_message: Option<String>,
    pub iterations: usize,
    pub objective: f64,
    pub constraint_violation: f64,
    pub mesh_history: Vec<MeshStageStats>,
    pub total_time: Duration,
}

impl Solution {
    fn phase(&self, phase: usize) -> OcpResult<&PhaseSolution> {
        self.phases.get(phase).ok_or_else(|| {
            OcpError::config(format!(
                "phase index {} out of range (solution has {} phases)",
                phase,
                self.phases.len()
            ))
        })
    }

    pub fn get_states_in_phase(&self, phase: usize) -> OcpResult<DMatrix<f64>> {
        Ok(self.phase(phase)?.states.clone())
    }

    pub fn get_controls_in_phase(&self, phase: usize) -> OcpResult<DMatrix<f64>> {
        Ok(self.phase(phase)?.controls.clone())
    }

    pub fn get_time_in_phase(&self, phase: usize) -> OcpResult<DVector<f64>> {
        Ok(self.phase(phase)?.time.clone())
    }

    pub fn get_parameters_in_phase(&self, phase: usize) -> OcpResult<DVector<f64>> {
        Ok(self.phase(phase)?.parameters.clone())
    }

    pub fn get_integrals_in_phase(&self, phase: usize) -> OcpResult<DVector<f64>> {
        Ok(self.phase(phase)?.integrals.clone())
    }

    /// None for schemes without costate estimates
    pub fn get_costates_in_phase(&self, phase: usize) -> OcpResult<Option<DMatrix<f64>>> {
        Ok(self.phase(phase)?.costates.clone())
    }

    pub fn get_events_in_phase(&self, phase: usize) -> OcpResult<DVector<f64>> {
        Ok(self.phase(phase)?.events.clone())
    }

    pub fn get_path_in_phase(&self, phase: usize) -> OcpResult<DMatrix<f64>> {
        Ok(self.phase(phase)?.path.clone())
    }

    pub fn is_converged(&self) -> bool {
        !self.error_flag
    }

    /// mesh history as a table
    pub fn mesh_table(&self) -> String {
        let records: Vec<Vec<String>> = self
            .mesh_history
            .iter()
            .map(|s| {
                vec![
                    s.stage.to_string(),
                    format!("{:?}", s.nodes),
                    s.status.to_string(),
                    s.iterations.to_string(),
                    format!("{:.6e}", s.objective),
                    format!("{:.3e}", s.constraint_violation),
                    s.ode_error
                        .map(|e| format!("{:.3e}", e))
                        .unwrap_or_else(|| "-".to_string()),
                    format!("{:.3}", s.cpu_time.as_secs_f64()),
                ]
            })
            .collect();
        records_table(
            &[
                "stage",
                "nodes",
                "status",
                "NLP iterations",
                "objective",
                "constraint violation",
                "ODE error",
                "CPU time, s",
            ],
            &records,
        )
    }
}

/// Reshape raw (unscaled) unknowns and constraint multipliers into per-phase results.
pub fn extract_phases(
    nlp: &DiscreteNlp,
    x: &DVector<f64>,
    lambda: &DVector<f64>,
    method: CollocationMethod,
) -> OcpResult<Vec<PhaseSolution>> {
    let mut phases = Vec::with_capacity(nlp.phases.len());
    for (ph, block) in nlp.phases.iter().enumerate() {
        let lay = &block.layout;
        let d = lay.dims;
        let n = lay.nnodes;
        let (t0, tf) = block.times(x);
        let time = DVector::from_vec(block.coll.node_times(t0, tf));
        let states = DMatrix::from_fn(d.nstates, n, |i, k| x[lay.global(lay.state(k, i))]);
        let controls = DMatrix::from_fn(d.ncontrols, n, |j, k| x[lay.global(lay.control(k, j))]);
        let parameters = DVector::from_fn(d.nparameters, |p, _| x[lay.global(lay.parameter(p))]);
        let integrals = DVector::from_fn(d.nintegrals, |q, _| x[lay.global(lay.integral(q))]);
        // values at a failed iterate may not be computable; NaN marks them
        let path = if d.npath > 0 {
            match nlp.node_outputs(ph, x) {
                Ok(outputs) => DMatrix::from_fn(d.npath, n, |j, k| outputs[k][d.nstates + j]),
                Err(e) => {
                    warn!("phase {}: path constraints not evaluated: {}", ph, e);
                    DMatrix::from_element(d.npath, n, f64::NAN)
                }
            }
        } else {
            DMatrix::zeros(0, n)
        };
        let events = match nlp.endpoint_outputs(ph, x) {
            Ok(ends) => DVector::from_fn(d.nevents, |e, _| ends[1 + e]),
            Err(e) => {
                warn!("phase {}: events not evaluated: {}", ph, e);
                DVector::from_element(d.nevents, f64::NAN)
            }
        };
        let costates = match method {
            CollocationMethod::Legendre => Some(DMatrix::from_fn(d.nstates, n, |i, k| {
                -lambda[block.defect_row(k, i)] / block.coll.weights[k]
            })),
            CollocationMethod::Trapezoidal => None,
        };
        phases.push(PhaseSolution {
            time,
            states,
            controls,
            parameters,
            integrals,
            costates,
            path,
            events,
        });
    }
    Ok(phases)
}
