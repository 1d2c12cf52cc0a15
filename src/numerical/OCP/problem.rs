//! # Problem model
//!
//! Declaration of a multi-phase optimal control problem, in two levels:
//! 1. [`Problem::level1_setup`] fixes the number of phases and linkage constraints;
//! 2. [`Phase::declare`] fixes the array sizes of each phase.
//!
//! Only after level 2 may bounds, node counts, guesses and scaling factors be set.
//! Every setter checks dimensions and rejects `lower > upper` right away, so a
//! malformed problem never reaches the transcription. Bounds with magnitude ≥ [`INF`]
//! (or IEEE infinities) mean "unbounded".
//!
//! # Example
//! ```rust,ignore
//! let mut problem = Problem::new("hanging chain");
//! problem.level1_setup(1, 0)?;
//! let phase = problem.phase_mut(0)?;
//! phase.declare(PhaseDimensions { nstates: 1, ncontrols: 1, nevents: 3, nintegrals: 1, ..Default::default() })?;
//! phase.set_nodes(vec![20, 50])?;
//! phase.set_state_bounds(&[-10.0], &[10.0])?;
//! ```
use crate::numerical::OCP::callbacks::OcpFunctions;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::OCP::solution::Solution;
use log::warn;
use nalgebra::{DMatrix, DVector};

/// magnitude from which a bound means "unbounded"
pub const INF: f64 = 1e19;

pub fn is_bounded(b: f64) -> bool {
    b.is_finite() && b.abs() < INF
}

/// Array sizes of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseDimensions {
    pub nstates: usize,
    pub ncontrols: usize,
    pub nparameters: usize,
    pub nevents: usize,
    pub npath: usize,
    pub nintegrals: usize,
}

/// Lower and upper bounds of a group of quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Bounds {
            lower: vec![-INF; n],
            upper: vec![INF; n],
        }
    }

    pub fn new(what: &str, lower: &[f64], upper: &[f64], expected: usize) -> OcpResult<Self> {
        if lower.len() != expected || upper.len() != expected {
            return Err(OcpError::config(format!(
                "{} bounds: expected {} values, got {} lower and {} upper",
                what,
                expected,
                lower.len(),
                upper.len()
            )));
        }
        for i in 0..expected {
            if lower[i].is_nan() || upper[i].is_nan() {
                return Err(OcpError::config(format!("{} bound {} is NaN", what, i)));
            }
            if lower[i] > upper[i] {
                return Err(OcpError::config(format!(
                    "{} bound {}: lower {} is above upper {}",
                    what, i, lower[i], upper[i]
                )));
            }
        }
        Ok(Bounds {
            lower: lower.to_vec(),
            upper: upper.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// midpoint, or the finite bound, or 0 when unbounded
    pub fn default_value(&self, i: usize) -> f64 {
        let (l, u) = (self.lower[i], self.upper[i]);
        match (is_bounded(l), is_bounded(u)) {
            (true, true) => 0.5 * (l + u),
            (true, false) => l,
            (false, true) => u,
            (false, false) => 0.0,
        }
    }
}

/// Initial guess of one phase at arbitrary resolution. States and controls are
/// stored one row per component and one column per time point.
#[derive(Debug, Clone, PartialEq)]
pub struct Guess {
    pub time: DVector<f64>,
    pub states: DMatrix<f64>,
    pub controls: DMatrix<f64>,
    pub parameters: DVector<f64>,
}

/// Manual scaling factors of one phase (used with `scaling = "manual"`).
/// Empty vectors mean unit factors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseScaling {
    pub states: Vec<f64>,
    pub controls: Vec<f64>,
    pub parameters: Vec<f64>,
    pub time: f64,
    pub events: Vec<f64>,
    pub path: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub index: usize,
    pub dims: Option<PhaseDimensions>,
    /// node counts, coarse to fine
    pub nodes: Vec<usize>,
    pub state_bounds: Bounds,
    pub control_bounds: Bounds,
    pub parameter_bounds: Bounds,
    pub event_bounds: Bounds,
    pub path_bounds: Bounds,
    pub start_time_bounds: (f64, f64),
    pub end_time_bounds: (f64, f64),
    pub guess: Option<Guess>,
    pub scaling: Option<PhaseScaling>,
}

impl Phase {
    fn new(index: usize) -> Self {
        Phase {
            index,
            dims: None,
            nodes: Vec::new(),
            state_bounds: Bounds::unbounded(0),
            control_bounds: Bounds::unbounded(0),
            parameter_bounds: Bounds::unbounded(0),
            event_bounds: Bounds::unbounded(0),
            path_bounds: Bounds::unbounded(0),
            start_time_bounds: (-INF, INF),
            end_time_bounds: (-INF, INF),
            guess: None,
            scaling: None,
        }
    }

    /// sizes declared at level 2, or a configuration error naming the setter
    pub fn dimensions(&self) -> OcpResult<PhaseDimensions> {
        self.dims.ok_or_else(|| {
            OcpError::config(format!(
                "phase {}: sizes must be declared before this call",
                self.index
            ))
        })
    }

    /// Level 2 setup. All bounds start unbounded.
    pub fn declare(&mut self, dims: PhaseDimensions) -> OcpResult<()> {
        if dims.nstates == 0 {
            return Err(OcpError::config(format!(
                "phase {} needs at least one state",
                self.index
            )));
        }
        self.dims = Some(dims);
        self.state_bounds = Bounds::unbounded(dims.nstates);
        self.control_bounds = Bounds::unbounded(dims.ncontrols);
        self.parameter_bounds = Bounds::unbounded(dims.nparameters);
        self.event_bounds = Bounds::unbounded(dims.nevents);
        self.path_bounds = Bounds::unbounded(dims.npath);
        Ok(())
    }

    pub fn set_nodes(&mut self, nodes: Vec<usize>) -> OcpResult<()> {
        self.dimensions()?;
        if nodes.is_empty() || nodes.iter().any(|&n| n < 2) {
            return Err(OcpError::config(format!(
                "phase {}: node counts must be non-empty and at least 2, got {:?}",
                self.index, nodes
            )));
        }
        self.nodes = nodes;
        Ok(())
    }

    pub fn set_state_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let d = self.dimensions()?;
        self.state_bounds = Bounds::new("state", lower, upper, d.nstates)?;
        Ok(())
    }

    pub fn set_control_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let d = self.dimensions()?;
        self.control_bounds = Bounds::new("control", lower, upper, d.ncontrols)?;
        Ok(())
    }

    pub fn set_parameter_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let d = self.dimensions()?;
        self.parameter_bounds = Bounds::new("parameter", lower, upper, d.nparameters)?;
        Ok(())
    }

    pub fn set_event_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let d = self.dimensions()?;
        self.event_bounds = Bounds::new("event", lower, upper, d.nevents)?;
        Ok(())
    }

    pub fn set_path_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        let d = self.dimensions()?;
        self.path_bounds = Bounds::new("path", lower, upper, d.npath)?;
        Ok(())
    }

    pub fn set_start_time_bounds(&mut self, lower: f64, upper: f64) -> OcpResult<()> {
        self.dimensions()?;
        let b = Bounds::new("start time", &[lower], &[upper], 1)?;
        self.start_time_bounds = (b.lower[0], b.upper[0]);
        Ok(())
    }

    pub fn set_end_time_bounds(&mut self, lower: f64, upper: f64) -> OcpResult<()> {
        self.dimensions()?;
        let b = Bounds::new("end time", &[lower], &[upper], 1)?;
        self.end_time_bounds = (b.lower[0], b.upper[0]);
        Ok(())
    }

    pub fn set_guess(&mut self, guess: Guess) -> OcpResult<()> {
        let d = self.dimensions()?;
        let nt = guess.time.len();
        if nt == 0 {
            return Err(OcpError::config(format!(
                "phase {}: guess time vector is empty",
                self.index
            )));
        }
        if guess.time.iter().any(|t| !t.is_finite()) || guess.time.as_slice().windows(2).any(|w| w[1] < w[0]) {
            return Err(OcpError::config(format!(
                "phase {}: guess time must be finite and non-decreasing",
                self.index
            )));
        }
        if guess.states.nrows() != d.nstates || guess.states.ncols() != nt {
            return Err(OcpError::config(format!(
                "phase {}: state guess must be {}x{}, got {}x{}",
                self.index,
                d.nstates,
                nt,
                guess.states.nrows(),
                guess.states.ncols()
            )));
        }
        if guess.controls.nrows() != d.ncontrols || (d.ncontrols > 0 && guess.controls.ncols() != nt)
        {
            return Err(OcpError::config(format!(
                "phase {}: control guess must be {}x{}, got {}x{}",
                self.index,
                d.ncontrols,
                nt,
                guess.controls.nrows(),
                guess.controls.ncols()
            )));
        }
        if guess.parameters.len() != d.nparameters {
            return Err(OcpError::config(format!(
                "phase {}: expected {} parameter guesses, got {}",
                self.index,
                d.nparameters,
                guess.parameters.len()
            )));
        }
        self.guess = Some(guess);
        Ok(())
    }

    pub fn set_scaling(&mut self, scaling: PhaseScaling) -> OcpResult<()> {
        let d = self.dimensions()?;
        let check = |what: &str, v: &[f64], n: usize| -> OcpResult<()> {
            if !v.is_empty() && v.len() != n {
                return Err(OcpError::config(format!(
                    "phase {}: {} scaling needs {} factors, got {}",
                    self.index,
                    what,
                    n,
                    v.len()
                )));
            }
            if v.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
                return Err(OcpError::config(format!(
                    "phase {}: {} scaling factors must be positive",
                    self.index, what
                )));
            }
            Ok(())
        };
        check("state", &scaling.states, d.nstates)?;
        check("control", &scaling.controls, d.ncontrols)?;
        check("parameter", &scaling.parameters, d.nparameters)?;
        check("event", &scaling.events, d.nevents)?;
        check("path", &scaling.path, d.npath)?;
        if scaling.time < 0.0 || !scaling.time.is_finite() {
            return Err(OcpError::config(format!(
                "phase {}: time scaling must be positive",
                self.index
            )));
        }
        self.scaling = Some(scaling);
        Ok(())
    }

    /// Guess used by the first mesh stage: the user guess, or bound midpoints.
    pub fn initial_guess(&self) -> OcpResult<Guess> {
        let d = self.dimensions()?;
        if let Some(g) = &self.guess {
            return Ok(g.clone());
        }
        warn!(
            "phase {}: no initial guess supplied, using bound midpoints",
            self.index
        );
        let t0 = Bounds {
            lower: vec![self.start_time_bounds.0],
            upper: vec![self.start_time_bounds.1],
        }
        .default_value(0);
        let tf_bounds = Bounds {
            lower: vec![self.end_time_bounds.0],
            upper: vec![self.end_time_bounds.1],
        };
        let mut tf = tf_bounds.default_value(0);
        if !is_bounded(self.end_time_bounds.0) && !is_bounded(self.end_time_bounds.1) || tf <= t0 {
            tf = t0 + 1.0;
        }
        let time = DVector::from_vec(vec![t0, tf]);
        let states = DMatrix::from_fn(d.nstates, 2, |i, _| self.state_bounds.default_value(i));
        let controls = DMatrix::from_fn(d.ncontrols, 2, |i, _| self.control_bounds.default_value(i));
        let parameters =
            DVector::from_fn(d.nparameters, |i, _| self.parameter_bounds.default_value(i));
        Ok(Guess {
            time,
            states,
            controls,
            parameters,
        })
    }
}

/// A multi-phase optimal control problem.
pub struct Problem {
    pub name: String,
    pub phases: Vec<Phase>,
    pub nlinkages: usize,
    pub linkage_bounds: Bounds,
    pub objective_scaling: f64,
    pub functions: Option<Box<dyn OcpFunctions>>,
    /// set by [`Problem::seed_from_solution`]
    pub warm_started: bool,
    level1_done: bool,
}

impl Problem {
    pub fn new(name: &str) -> Self {
        Problem {
            name: name.to_string(),
            phases: Vec::new(),
            nlinkages: 0,
            linkage_bounds: Bounds::unbounded(0),
            objective_scaling: 1.0,
            functions: None,
            warm_started: false,
            level1_done: false,
        }
    }

    /// Level 1 setup: number of phases and of linkage constraints. Can be done once.
    pub fn level1_setup(&mut self, nphases: usize, nlinkages: usize) -> OcpResult<()> {
        if self.level1_done {
            return Err(OcpError::config("level 1 setup was already done"));
        }
        if nphases == 0 {
            return Err(OcpError::config("a problem needs at least one phase"));
        }
        self.phases = (0..nphases).map(Phase::new).collect();
        self.nlinkages = nlinkages;
        // linkages default to equality with zero
        self.linkage_bounds = Bounds {
            lower: vec![0.0; nlinkages],
            upper: vec![0.0; nlinkages],
        };
        self.level1_done = true;
        Ok(())
    }

    pub fn nphases(&self) -> usize {
        self.phases.len()
    }

    pub fn phase(&self, index: usize) -> OcpResult<&Phase> {
        let n = self.phases.len();
        self.phases.get(index).ok_or_else(|| {
            OcpError::config(format!("phase index {} out of range (problem has {} phases)", index, n))
        })
    }

    pub fn phase_mut(&mut self, index: usize) -> OcpResult<&mut Phase> {
        let n = self.phases.len();
        self.phases.get_mut(index).ok_or_else(|| {
            OcpError::config(format!("phase index {} out of range (problem has {} phases)", index, n))
        })
    }

    pub fn set_linkage_bounds(&mut self, lower: &[f64], upper: &[f64]) -> OcpResult<()> {
        if !self.level1_done {
            return Err(OcpError::config("linkage bounds set before level 1 setup"));
        }
        self.linkage_bounds = Bounds::new("linkage", lower, upper, self.nlinkages)?;
        Ok(())
    }

    pub fn set_objective_scaling(&mut self, factor: f64) -> OcpResult<()> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(OcpError::config("objective scaling must be positive"));
        }
        self.objective_scaling = factor;
        Ok(())
    }

    pub fn set_functions(&mut self, functions: Box<dyn OcpFunctions>) {
        self.functions = Some(functions);
    }

    pub fn functions(&self) -> OcpResult<&dyn OcpFunctions> {
        self.functions
            .as_deref()
            .ok_or_else(|| OcpError::config("no callbacks were set for the problem"))
    }

    /// Use a previous solution as the guess of every phase.
    pub fn seed_from_solution(&mut self, solution: &Solution) -> OcpResult<()> {
        if solution.phases.len() != self.phases.len() {
            return Err(OcpError::config(format!(
                "solution has {} phases, problem has {}",
                solution.phases.len(),
                self.phases.len()
            )));
        }
        for (phase, sol) in self.phases.iter_mut().zip(solution.phases.iter()) {
            phase.set_guess(sol.as_guess())?;
        }
        self.warm_started = true;
        Ok(())
    }

    /// Consistency check of the whole declaration.
    pub fn validate(&self) -> OcpResult<()> {
        if !self.level1_done {
            return Err(OcpError::config("level 1 setup missing"));
        }
        self.functions()?;
        for phase in &self.phases {
            let d = phase.dimensions()?;
            if phase.nodes.is_empty() {
                return Err(OcpError::config(format!(
                    "phase {}: node counts were not set",
                    phase.index
                )));
            }
            let sizes = [
                ("state", phase.state_bounds.len(), d.nstates),
                ("control", phase.control_bounds.len(), d.ncontrols),
                ("parameter", phase.parameter_bounds.len(), d.nparameters),
                ("event", phase.event_bounds.len(), d.nevents),
                ("path", phase.path_bounds.len(), d.npath),
            ];
            for (what, got, expected) in sizes {
                if got != expected {
                    return Err(OcpError::config(format!(
                        "phase {}: {} bounds have {} entries, expected {}",
                        phase.index, what, got, expected
                    )));
                }
            }
            if phase.start_time_bounds.0 > phase.end_time_bounds.1 {
                return Err(OcpError::config(format!(
                    "phase {}: start time lower bound exceeds end time upper bound",
                    phase.index
                )));
            }
        }
        if self.linkage_bounds.len() != self.nlinkages {
            return Err(OcpError::config("linkage bounds do not match the linkage count"));
        }
        Ok(())
    }
}
