//! # Transcription
//!
//! Turns the problem at one mesh stage into a sparse nonlinear program
//! ([`DiscreteNlp`]) for the interior point solver.
//!
//! Unknowns of a phase (node-interleaved):
//! ```text
//!  [x_0 u_0 | x_1 u_1 | ... | x_{N-1} u_{N-1} | p | t0 | tf | Q]
//! ```
//! Rows of a phase: defects (row r of the collocation operator, state i), path
//! constraints per node, events, integral rows. Linkage rows follow all phases.
//!
//! User callbacks are evaluated block by block on short local input vectors:
//! - node block: inputs `[x_k, u_k, p, t0, tf]`, outputs
//!   `[(tf−t0)/2 f, path, (tf−t0)/2 L, (tf−t0)/2 G_q]`
//! - endpoint block: inputs `[x_0, x_{N-1}, p, t0, tf, Q]`, outputs `[Φ, events]`
//! - linkage block: inputs all unknowns, outputs the linkage residuals
//!
//! Each block family is probed once for sparsity; later evaluations seed only the
//! active inputs and scatter local gradients/Hessians into the global triplets.
use crate::autodiff::ad_number::packed_index;
use crate::autodiff::{
    Ad, BlockPattern, DerivativeMethod, DerivativeOrder, LocalEvaluation, ProbePerturbation,
    evaluate_local,
};
use crate::numerical::OCP::algorithm::Algorithm;
use crate::numerical::OCP::callbacks::{Endpoints, NodeArgs, NodeValues, OcpFunctions};
use crate::numerical::OCP::collocation::Collocation;
use crate::numerical::OCP::integrals::QuadratureTerms;
use crate::numerical::OCP::linkages::PhaseUnknowns;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::OCP::problem::{Guess, INF, PhaseDimensions, Problem};
use crate::numerical::optimization::nlp_problem::{FirstOrder, NlpBounds, NlpProblem};
use crate::somelinalg::sparse_triplets::SparseTriplets;
use log::{debug, info};
use nalgebra::DVector;
use rayon::prelude::*;
use splines::{Interpolation, Key, Spline};

/// Position of every unknown of one phase inside the phase slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseLayout {
    pub dims: PhaseDimensions,
    pub nnodes: usize,
    /// index of the first unknown of the phase in the NLP vector
    pub offset: usize,
}

impl PhaseLayout {
    pub fn new(dims: PhaseDimensions, nnodes: usize, offset: usize) -> Self {
        PhaseLayout {
            dims,
            nnodes,
            offset,
        }
    }

    fn node_width(&self) -> usize {
        self.dims.nstates + self.dims.ncontrols
    }

    pub fn state(&self, k: usize, i: usize) -> usize {
        k * self.node_width() + i
    }

    pub fn control(&self, k: usize, j: usize) -> usize {
        k * self.node_width() + self.dims.nstates + j
    }

    pub fn parameter(&self, p: usize) -> usize {
        self.nnodes * self.node_width() + p
    }

    pub fn t0(&self) -> usize {
        self.parameter(self.dims.nparameters)
    }

    pub fn tf(&self) -> usize {
        self.t0() + 1
    }

    pub fn integral(&self, q: usize) -> usize {
        self.tf() + 1 + q
    }

    pub fn nvars(&self) -> usize {
        self.integral(self.dims.nintegrals)
    }

    /// global index of a local one
    pub fn global(&self, local: usize) -> usize {
        self.offset + local
    }

    /// number of local inputs of the node block
    pub fn node_inputs(&self) -> usize {
        self.node_width() + self.dims.nparameters + 2
    }

    /// number of outputs of the node block
    pub fn node_outputs(&self) -> usize {
        self.dims.nstates + self.dims.npath + 1 + self.dims.nintegrals
    }

    pub fn endpoint_inputs(&self) -> usize {
        2 * self.dims.nstates + self.dims.nparameters + 2 + self.dims.nintegrals
    }

    pub fn endpoint_outputs(&self) -> usize {
        1 + self.dims.nevents
    }
}

/// One phase of the discrete NLP: layout, collocation scheme, row offsets and the
/// cached sparsity of its callback blocks.
#[derive(Debug, Clone)]
pub struct PhaseBlock {
    pub index: usize,
    pub layout: PhaseLayout,
    pub coll: Collocation,
    pub row_offset: usize,
    pub node_pattern: BlockPattern,
    pub endpoint_pattern: BlockPattern,
    pub quadrature: QuadratureTerms,
}

impl PhaseBlock {
    fn dims(&self) -> PhaseDimensions {
        self.layout.dims
    }

    pub fn ndefect_rows(&self) -> usize {
        self.coll.ndefect_rows() * self.dims().nstates
    }

    pub fn defect_row(&self, r: usize, i: usize) -> usize {
        self.row_offset + r * self.dims().nstates + i
    }

    pub fn path_row(&self, k: usize, j: usize) -> usize {
        self.row_offset + self.ndefect_rows() + k * self.dims().npath + j
    }

    pub fn event_row(&self, e: usize) -> usize {
        self.row_offset + self.ndefect_rows() + self.layout.nnodes * self.dims().npath + e
    }

    pub fn integral_row(&self, q: usize) -> usize {
        self.event_row(self.dims().nevents) + q
    }

    pub fn nrows(&self) -> usize {
        self.integral_row(self.dims().nintegrals) - self.row_offset
    }

    /// global unknown behind local input `l` of the node block at node k
    pub fn node_global(&self, k: usize, l: usize) -> usize {
        let d = self.dims();
        let lay = &self.layout;
        let local = if l < d.nstates {
            lay.state(k, l)
        } else if l < d.nstates + d.ncontrols {
            lay.control(k, l - d.nstates)
        } else if l < d.nstates + d.ncontrols + d.nparameters {
            lay.parameter(l - d.nstates - d.ncontrols)
        } else if l == d.nstates + d.ncontrols + d.nparameters {
            lay.t0()
        } else {
            lay.tf()
        };
        lay.global(local)
    }

    /// global unknown behind local input `l` of the endpoint block
    pub fn endpoint_global(&self, l: usize) -> usize {
        let d = self.dims();
        let lay = &self.layout;
        let (ns, np) = (d.nstates, d.nparameters);
        let local = if l < ns {
            lay.state(0, l)
        } else if l < 2 * ns {
            lay.state(lay.nnodes - 1, l - ns)
        } else if l < 2 * ns + np {
            lay.parameter(l - 2 * ns)
        } else if l == 2 * ns + np {
            lay.t0()
        } else if l == 2 * ns + np + 1 {
            lay.tf()
        } else {
            lay.integral(l - 2 * ns - np - 2)
        };
        lay.global(local)
    }

    pub fn node_point(&self, x: &DVector<f64>, k: usize) -> Vec<f64> {
        (0..self.layout.node_inputs())
            .map(|l| x[self.node_global(k, l)])
            .collect()
    }

    pub fn endpoint_point(&self, x: &DVector<f64>) -> Vec<f64> {
        (0..self.layout.endpoint_inputs())
            .map(|l| x[self.endpoint_global(l)])
            .collect()
    }

    pub fn times(&self, x: &DVector<f64>) -> (f64, f64) {
        (
            x[self.layout.global(self.layout.t0())],
            x[self.layout.global(self.layout.tf())],
        )
    }
}

/// All callback blocks evaluated at one point.
struct PointEvaluation {
    nodes: Vec<Vec<LocalEvaluation>>,
    endpoints: Vec<LocalEvaluation>,
    linkages: Option<LocalEvaluation>,
}

/// The nonlinear program of one mesh stage.
pub struct DiscreteNlp<'p> {
    functions: &'p dyn OcpFunctions,
    pub phases: Vec<PhaseBlock>,
    pub nvars: usize,
    pub ncons: usize,
    pub nlinkages: usize,
    pub link_row_offset: usize,
    link_pattern: Option<BlockPattern>,
    derivatives: DerivativeMethod,
    parallel: bool,
    bounds: NlpBounds,
    x0: DVector<f64>,
}

/// Linear interpolation of one guess row at time `t`, constant outside the data.
fn resample(times: &[f64], values: &[f64], t: f64) -> f64 {
    if values.len() == 1 {
        return values[0];
    }
    let keys: Vec<Key<f64, f64>> = times
        .iter()
        .zip(values.iter())
        .map(|(&ti, &vi)| Key::new(ti, vi, Interpolation::Linear))
        .collect();
    let spline = Spline::from_vec(keys);
    match spline.clamped_sample(t) {
        Some(v) => v,
        None if t <= times[0] => values[0],
        None => values[values.len() - 1],
    }
}

fn clamp_to_bounds(v: f64, lower: f64, upper: f64) -> f64 {
    let mut v = v;
    if lower > -INF && v < lower {
        v = lower;
    }
    if upper < INF && v > upper {
        v = upper;
    }
    v
}

impl<'p> DiscreteNlp<'p> {
    /// Build the NLP of one stage. `nodes[ph]` is the node count of phase `ph` and
    /// `guesses[ph]` its guess (from the problem or from the previous stage).
    pub fn new(
        problem: &'p Problem,
        algorithm: &Algorithm,
        nodes: &[usize],
        guesses: &[Guess],
    ) -> OcpResult<Self> {
        let functions = problem.functions()?;
        if nodes.len() != problem.nphases() || guesses.len() != problem.nphases() {
            return Err(OcpError::config(
                "node counts and guesses must be given for every phase",
            ));
        }
        let mut phases = Vec::with_capacity(problem.nphases());
        let (mut var_offset, mut row_offset) = (0, 0);
        for (ph, phase) in problem.phases.iter().enumerate() {
            let dims = phase.dimensions()?;
            let coll = Collocation::new(algorithm.collocation, nodes[ph])?;
            let layout = PhaseLayout::new(dims, nodes[ph], var_offset);
            let block = PhaseBlock {
                index: ph,
                layout,
                coll,
                row_offset,
                node_pattern: BlockPattern::full(layout.node_inputs(), layout.node_outputs()),
                endpoint_pattern: BlockPattern::full(
                    layout.endpoint_inputs(),
                    layout.endpoint_outputs(),
                ),
                quadrature: QuadratureTerms::new(dims.nstates + dims.npath, dims.nintegrals),
            };
            var_offset += layout.nvars();
            row_offset += block.nrows();
            phases.push(block);
        }
        let nlinkages = problem.nlinkages;
        let mut nlp = DiscreteNlp {
            functions,
            phases,
            nvars: var_offset,
            ncons: row_offset + nlinkages,
            nlinkages,
            link_row_offset: row_offset,
            link_pattern: None,
            derivatives: algorithm.derivatives,
            parallel: algorithm.parallel,
            bounds: NlpBounds {
                x_lower: DVector::zeros(0),
                x_upper: DVector::zeros(0),
                g_lower: DVector::zeros(0),
                g_upper: DVector::zeros(0),
            },
            x0: DVector::zeros(var_offset),
        };
        nlp.bounds = nlp.assemble_bounds(problem);
        nlp.x0 = nlp.initial_point_from(problem, guesses)?;
        nlp.probe_sparsity();
        nlp.initialize_integrals()?;
        info!(
            "transcription: {} phases, {} variables, {} constraints",
            nlp.phases.len(),
            nlp.nvars,
            nlp.ncons
        );
        Ok(nlp)
    }

    fn assemble_bounds(&self, problem: &Problem) -> NlpBounds {
        let mut xl = DVector::from_element(self.nvars, -INF);
        let mut xu = DVector::from_element(self.nvars, INF);
        let mut gl = DVector::zeros(self.ncons);
        let mut gu = DVector::zeros(self.ncons);
        for (block, phase) in self.phases.iter().zip(problem.phases.iter()) {
            let lay = &block.layout;
            let d = lay.dims;
            for k in 0..lay.nnodes {
                for i in 0..d.nstates {
                    xl[lay.global(lay.state(k, i))] = phase.state_bounds.lower[i];
                    xu[lay.global(lay.state(k, i))] = phase.state_bounds.upper[i];
                }
                for j in 0..d.ncontrols {
                    xl[lay.global(lay.control(k, j))] = phase.control_bounds.lower[j];
                    xu[lay.global(lay.control(k, j))] = phase.control_bounds.upper[j];
                }
                for j in 0..d.npath {
                    gl[block.path_row(k, j)] = phase.path_bounds.lower[j];
                    gu[block.path_row(k, j)] = phase.path_bounds.upper[j];
                }
            }
            for p in 0..d.nparameters {
                xl[lay.global(lay.parameter(p))] = phase.parameter_bounds.lower[p];
                xu[lay.global(lay.parameter(p))] = phase.parameter_bounds.upper[p];
            }
            xl[lay.global(lay.t0())] = phase.start_time_bounds.0;
            xu[lay.global(lay.t0())] = phase.start_time_bounds.1;
            xl[lay.global(lay.tf())] = phase.end_time_bounds.0;
            xu[lay.global(lay.tf())] = phase.end_time_bounds.1;
            for e in 0..d.nevents {
                gl[block.event_row(e)] = phase.event_bounds.lower[e];
                gu[block.event_row(e)] = phase.event_bounds.upper[e];
            }
            // defect and integral rows stay equalities with zero
        }
        for l in 0..self.nlinkages {
            gl[self.link_row_offset + l] = problem.linkage_bounds.lower[l];
            gu[self.link_row_offset + l] = problem.linkage_bounds.upper[l];
        }
        NlpBounds {
            x_lower: xl,
            x_upper: xu,
            g_lower: gl,
            g_upper: gu,
        }
    }

    /// Resample the guesses onto the node grid. Integral unknowns are filled later.
    fn initial_point_from(&self, problem: &Problem, guesses: &[Guess]) -> OcpResult<DVector<f64>> {
        let mut x = DVector::zeros(self.nvars);
        for (block, guess) in self.phases.iter().zip(guesses.iter()) {
            let lay = &block.layout;
            let d = lay.dims;
            let nt = guess.time.len();
            if nt == 0 || guess.states.nrows() != d.nstates || guess.parameters.len() != d.nparameters
            {
                return Err(OcpError::config(format!(
                    "phase {}: guess does not match the declared sizes",
                    block.index
                )));
            }
            let times = guess.time.as_slice();
            let t0 = times[0];
            let tf = if times[nt - 1] > t0 { times[nt - 1] } else { t0 + 1.0 };
            let node_times = block.coll.node_times(t0, tf);
            let row = |m: &nalgebra::DMatrix<f64>, i: usize| -> Vec<f64> {
                m.row(i).iter().copied().collect()
            };
            for i in 0..d.nstates {
                let values = row(&guess.states, i);
                for (k, &t) in node_times.iter().enumerate() {
                    x[lay.global(lay.state(k, i))] = resample(times, &values, t);
                }
            }
            for j in 0..d.ncontrols {
                let values = row(&guess.controls, j);
                if values.len() != nt {
                    return Err(OcpError::config(format!(
                        "phase {}: control guess has {} points, time has {}",
                        block.index,
                        values.len(),
                        nt
                    )));
                }
                for (k, &t) in node_times.iter().enumerate() {
                    x[lay.global(lay.control(k, j))] = resample(times, &values, t);
                }
            }
            for p in 0..d.nparameters {
                x[lay.global(lay.parameter(p))] = guess.parameters[p];
            }
            let phase = problem.phase(block.index)?;
            x[lay.global(lay.t0())] =
                clamp_to_bounds(t0, phase.start_time_bounds.0, phase.start_time_bounds.1);
            x[lay.global(lay.tf())] =
                clamp_to_bounds(tf, phase.end_time_bounds.0, phase.end_time_bounds.1);
        }
        Ok(x)
    }

    /// Probe every block family once around the initial point.
    fn probe_sparsity(&mut self) {
        let mut perturbation = ProbePerturbation::new();
        let x0 = self.x0.clone();
        let mut node_patterns = Vec::with_capacity(self.phases.len());
        let mut endpoint_patterns = Vec::with_capacity(self.phases.len());
        for block in &self.phases {
            let n = block.layout.nnodes;
            let samples = [0, n / 2, n - 1];
            let mut node_pattern: Option<BlockPattern> = None;
            for &k in samples.iter() {
                let f = self.node_function(block, block.coll.tau[k]);
                let point = perturbation.perturb(&block.node_point(&x0, k));
                let p = BlockPattern::probe(
                    &f,
                    &[point],
                    block.layout.node_outputs(),
                    &format!("phase {} nodes", block.index),
                );
                node_pattern = Some(match node_pattern {
                    None => p,
                    Some(prev) => merge_patterns(&prev, &p),
                });
            }
            let f = self.endpoint_function(block);
            let points: Vec<Vec<f64>> = (0..2)
                .map(|_| perturbation.perturb(&block.endpoint_point(&x0)))
                .collect();
            let endpoint_pattern = BlockPattern::probe(
                &f,
                &points,
                block.layout.endpoint_outputs(),
                &format!("phase {} endpoints", block.index),
            );
            node_patterns.push(node_pattern);
            endpoint_patterns.push(endpoint_pattern);
        }
        for ((block, np), ep) in self
            .phases
            .iter_mut()
            .zip(node_patterns)
            .zip(endpoint_patterns)
        {
            if let Some(np) = np {
                block.node_pattern = np;
            }
            block.endpoint_pattern = ep;
        }
        if self.nlinkages > 0 {
            let pattern = {
                let f = self.linkage_function();
                let point = perturbation.perturb(x0.as_slice());
                BlockPattern::probe(&f, &[point], self.nlinkages, "linkages")
            };
            self.link_pattern = Some(pattern);
        }
    }

    /// Q unknowns start at the quadrature of the guess.
    fn initialize_integrals(&mut self) -> OcpResult<()> {
        let x = self.x0.clone();
        for ph in 0..self.phases.len() {
            let block = &self.phases[ph];
            if block.layout.dims.nintegrals == 0 {
                continue;
            }
            let outputs = self.node_outputs(ph, &x)?;
            let values = block.quadrature.integrals(&block.coll, &outputs);
            let lay = block.layout;
            for (q, v) in values.into_iter().enumerate() {
                self.x0[lay.global(lay.integral(q))] = v;
            }
        }
        Ok(())
    }

    /// node block of a phase at normalized time τ
    pub fn node_function<'s>(
        &'s self,
        block: &'s PhaseBlock,
        tau: f64,
    ) -> impl Fn(&[Ad]) -> Vec<Ad> + 's {
        let d = block.layout.dims;
        let phase = block.index;
        let functions = self.functions;
        move |inputs: &[Ad]| {
            let (x, rest) = inputs.split_at(d.nstates);
            let (u, rest) = rest.split_at(d.ncontrols);
            let (p, rest) = rest.split_at(d.nparameters);
            let (t0, tf) = (&rest[0], &rest[1]);
            let half = (tf - t0) * 0.5;
            let time = t0 * (0.5 * (1.0 - tau)) + tf * (0.5 * (1.0 + tau));
            let args = NodeArgs {
                states: x,
                controls: u,
                parameters: p,
                time: &time,
            };
            let mut derivatives = vec![Ad::constant(0.0); d.nstates];
            let mut path = vec![Ad::constant(0.0); d.npath];
            functions.dae(&args, &mut derivatives, &mut path, phase);
            let mut out = Vec::with_capacity(d.nstates + d.npath + 1 + d.nintegrals);
            out.extend(derivatives.iter().map(|f| f * &half));
            out.extend(path);
            out.push(functions.integrand_cost(&args, phase) * &half);
            for q in 0..d.nintegrals {
                out.push(functions.integrand(&args, q, phase) * &half);
            }
            out
        }
    }

    /// endpoint block of a phase
    pub fn endpoint_function<'s>(&'s self, block: &'s PhaseBlock) -> impl Fn(&[Ad]) -> Vec<Ad> + 's {
        let d = block.layout.dims;
        let phase = block.index;
        let functions = self.functions;
        move |inputs: &[Ad]| {
            let (x0, rest) = inputs.split_at(d.nstates);
            let (xf, rest) = rest.split_at(d.nstates);
            let (p, rest) = rest.split_at(d.nparameters);
            let ends = Endpoints {
                initial_states: x0,
                final_states: xf,
                parameters: p,
                t0: &rest[0],
                tf: &rest[1],
                integrals: &rest[2..],
            };
            let mut out = Vec::with_capacity(1 + d.nevents);
            out.push(functions.endpoint_cost(&ends, phase));
            let mut events = vec![Ad::constant(0.0); d.nevents];
            functions.events(&ends, &mut events, phase);
            out.extend(events);
            out
        }
    }

    /// linkage block over the whole unknown vector
    pub fn linkage_function(&self) -> impl Fn(&[Ad]) -> Vec<Ad> + '_ {
        move |inputs: &[Ad]| {
            let views: Vec<PhaseUnknowns> = self
                .phases
                .iter()
                .map(|b| {
                    let start = b.layout.offset;
                    PhaseUnknowns::new(b.index, b.layout, &inputs[start..start + b.layout.nvars()])
                })
                .collect();
            let mut out = vec![Ad::constant(0.0); self.nlinkages];
            self.functions.linkages(&views, &mut out);
            out
        }
    }

    /// Node block outputs (values only) of phase `ph` at every node.
    pub fn node_outputs(&self, ph: usize, x: &DVector<f64>) -> OcpResult<Vec<Vec<f64>>> {
        let evals = self.eval_phase_nodes(&self.phases[ph], x, DerivativeOrder::Values)?;
        Ok(evals.into_iter().map(|e| e.values).collect())
    }

    /// Endpoint block outputs `[Φ, events]` of phase `ph`.
    pub fn endpoint_outputs(&self, ph: usize, x: &DVector<f64>) -> OcpResult<Vec<f64>> {
        let block = &self.phases[ph];
        let f = self.endpoint_function(block);
        let ev = evaluate_local(
            &f,
            &block.endpoint_point(x),
            &[],
            self.derivatives,
            DerivativeOrder::Values,
            "endpoints",
        )?;
        Ok(ev.values)
    }

    /// Node block outputs of phase `ph` at an arbitrary τ for the given local inputs.
    pub fn node_outputs_at(&self, ph: usize, tau: f64, point: &[f64]) -> OcpResult<Vec<f64>> {
        let block = &self.phases[ph];
        let f = self.node_function(block, tau);
        let ev = evaluate_local(
            &f,
            point,
            &[],
            self.derivatives,
            DerivativeOrder::Values,
            "interpolated node",
        )?;
        Ok(ev.values)
    }

    fn eval_phase_nodes(
        &self,
        block: &PhaseBlock,
        x: &DVector<f64>,
        order: DerivativeOrder,
    ) -> OcpResult<Vec<LocalEvaluation>> {
        let eval = |k: usize| -> OcpResult<LocalEvaluation> {
            let f = self.node_function(block, block.coll.tau[k]);
            let point = block.node_point(x, k);
            let active: &[usize] = if order == DerivativeOrder::Values {
                &[]
            } else {
                &block.node_pattern.active
            };
            let label = format!("phase {} node {}", block.index, k);
            let mut ev = evaluate_local(&f, &point, active, self.derivatives, order, &label)?;
            if self.derivatives == DerivativeMethod::AnalyticIfSupplied
                && order > DerivativeOrder::Values
            {
                self.apply_dae_jacobian(block, block.coll.tau[k], &point, &mut ev)?;
            }
            Ok(ev)
        };
        let n = block.layout.nnodes;
        if self.parallel {
            (0..n).into_par_iter().map(|k| eval(k)).collect()
        } else {
            (0..n).map(|k| eval(k)).collect()
        }
    }

    /// Replace the AD gradients of the dynamics outputs with respect to states and
    /// controls by the user Jacobian, when one is supplied.
    fn apply_dae_jacobian(
        &self,
        block: &PhaseBlock,
        tau: f64,
        point: &[f64],
        ev: &mut LocalEvaluation,
    ) -> OcpResult<()> {
        let d = block.layout.dims;
        let (ns, nc, np) = (d.nstates, d.ncontrols, d.nparameters);
        let (t0, tf) = (point[ns + nc + np], point[ns + nc + np + 1]);
        let half = 0.5 * (tf - t0);
        let values = NodeValues {
            states: &point[..ns],
            controls: &point[ns..ns + nc],
            parameters: &point[ns + nc..ns + nc + np],
            time: 0.5 * t0 * (1.0 - tau) + 0.5 * tf * (1.0 + tau),
        };
        let Some(jac) = self.functions.dae_jacobian(&values, block.index) else {
            return Ok(());
        };
        if jac.nrows() != ns || jac.ncols() != ns + nc {
            return Err(OcpError::config(format!(
                "phase {}: dae_jacobian must be {}x{}, got {}x{}",
                block.index,
                ns,
                ns + nc,
                jac.nrows(),
                jac.ncols()
            )));
        }
        for i in 0..ns {
            for (pos, &l) in block.node_pattern.active.iter().enumerate() {
                if l < ns + nc {
                    ev.gradients[i][pos] = half * jac[(i, l)];
                }
            }
        }
        Ok(())
    }

    fn evaluate_point(&self, x: &DVector<f64>, order: DerivativeOrder) -> OcpResult<PointEvaluation> {
        let mut nodes = Vec::with_capacity(self.phases.len());
        let mut endpoints = Vec::with_capacity(self.phases.len());
        for block in &self.phases {
            nodes.push(self.eval_phase_nodes(block, x, order)?);
            let f = self.endpoint_function(block);
            let active: &[usize] = if order == DerivativeOrder::Values {
                &[]
            } else {
                &block.endpoint_pattern.active
            };
            let label = format!("phase {} endpoints", block.index);
            endpoints.push(evaluate_local(
                &f,
                &block.endpoint_point(x),
                active,
                self.derivatives,
                order,
                &label,
            )?);
        }
        let linkages = match &self.link_pattern {
            Some(pattern) => {
                let f = self.linkage_function();
                let active: &[usize] = if order == DerivativeOrder::Values {
                    &[]
                } else {
                    &pattern.active
                };
                Some(evaluate_local(
                    &f,
                    x.as_slice(),
                    active,
                    self.derivatives,
                    order,
                    "linkages",
                )?)
            }
            None => None,
        };
        Ok(PointEvaluation {
            nodes,
            endpoints,
            linkages,
        })
    }

    fn assemble_values(&self, x: &DVector<f64>, ev: &PointEvaluation) -> (f64, DVector<f64>) {
        let mut objective = 0.0;
        let mut g = DVector::zeros(self.ncons);
        for (ph, block) in self.phases.iter().enumerate() {
            let d = block.layout.dims;
            let lay = &block.layout;
            let outputs: Vec<&Vec<f64>> = ev.nodes[ph].iter().map(|e| &e.values).collect();
            // STEP 1: defects
            for (r, (arow, brow)) in block
                .coll
                .a_by_row
                .iter()
                .zip(block.coll.b_by_row.iter())
                .enumerate()
            {
                for i in 0..d.nstates {
                    let ax: f64 = arow
                        .iter()
                        .map(|&(k, a)| a * x[lay.global(lay.state(k, i))])
                        .sum();
                    let bh: f64 = brow.iter().map(|&(k, b)| b * outputs[k][i]).sum();
                    g[block.defect_row(r, i)] = ax - bh;
                }
            }
            // STEP 2: path constraints
            for k in 0..lay.nnodes {
                for j in 0..d.npath {
                    g[block.path_row(k, j)] = outputs[k][d.nstates + j];
                }
            }
            // STEP 3: Lagrange and Mayer terms, events
            objective += block.quadrature.cost(&block.coll, &outputs);
            let ends = &ev.endpoints[ph].values;
            objective += ends[0];
            for e in 0..d.nevents {
                g[block.event_row(e)] = ends[1 + e];
            }
            // STEP 4: integral rows
            let q_values: Vec<f64> = (0..d.nintegrals)
                .map(|q| x[lay.global(lay.integral(q))])
                .collect();
            let residuals = block
                .quadrature
                .residuals(&block.coll, &outputs, &q_values);
            for (q, r) in residuals.into_iter().enumerate() {
                g[block.integral_row(q)] = r;
            }
        }
        if let Some(link) = &ev.linkages {
            for (l, v) in link.values.iter().enumerate() {
                g[self.link_row_offset + l] = *v;
            }
        }
        (objective, g)
    }

    fn assemble_jacobian(
        &self,
        ev: &PointEvaluation,
    ) -> (DVector<f64>, SparseTriplets) {
        let mut grad = DVector::zeros(self.nvars);
        let mut jac = SparseTriplets::new(self.ncons, self.nvars);
        for (ph, block) in self.phases.iter().enumerate() {
            let d = block.layout.dims;
            let lay = &block.layout;
            let pattern = &block.node_pattern;
            // constant part of the defects
            for (r, arow) in block.coll.a_by_row.iter().enumerate() {
                for i in 0..d.nstates {
                    for &(k, a) in arow {
                        jac.push(block.defect_row(r, i), lay.global(lay.state(k, i)), a);
                    }
                }
            }
            for q in 0..d.nintegrals {
                jac.push(block.integral_row(q), lay.global(lay.integral(q)), 1.0);
            }
            for (k, node) in ev.nodes[ph].iter().enumerate() {
                let col = |pos: usize| block.node_global(k, pattern.active[pos]);
                for i in 0..d.nstates {
                    for &(r, b) in &block.coll.b_by_node[k] {
                        for &pos in &pattern.output_nonzeros[i] {
                            jac.push(block.defect_row(r, i), col(pos), -b * node.gradients[i][pos]);
                        }
                    }
                }
                for j in 0..d.npath {
                    let o = d.nstates + j;
                    for &pos in &pattern.output_nonzeros[o] {
                        jac.push(block.path_row(k, j), col(pos), node.gradients[o][pos]);
                    }
                }
                let w = block.coll.weights[k];
                let o = block.quadrature.cost_output;
                for &pos in &pattern.output_nonzeros[o] {
                    grad[col(pos)] += w * node.gradients[o][pos];
                }
                for q in 0..d.nintegrals {
                    let o = block.quadrature.integrand_output(q);
                    for &pos in &pattern.output_nonzeros[o] {
                        jac.push(block.integral_row(q), col(pos), -w * node.gradients[o][pos]);
                    }
                }
            }
            let ends = &ev.endpoints[ph];
            let ep = &block.endpoint_pattern;
            let col = |pos: usize| block.endpoint_global(ep.active[pos]);
            for &pos in &ep.output_nonzeros[0] {
                grad[col(pos)] += ends.gradients[0][pos];
            }
            for e in 0..d.nevents {
                for &pos in &ep.output_nonzeros[1 + e] {
                    jac.push(block.event_row(e), col(pos), ends.gradients[1 + e][pos]);
                }
            }
        }
        if let (Some(link), Some(pattern)) = (&ev.linkages, &self.link_pattern) {
            for l in 0..self.nlinkages {
                for &pos in &pattern.output_nonzeros[l] {
                    jac.push(
                        self.link_row_offset + l,
                        pattern.active[pos],
                        link.gradients[l][pos],
                    );
                }
            }
        }
        (grad, jac)
    }

    fn assemble_hessian(
        &self,
        ev: &PointEvaluation,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> SparseTriplets {
        let mut h = SparseTriplets::new(self.nvars, self.nvars);
        let mut scatter = |weighted: Option<Vec<f64>>, globals: &dyn Fn(usize) -> usize, na: usize| {
            let Some(wh) = weighted else {
                return;
            };
            for a in 0..na {
                for b in 0..=a {
                    let v = wh[packed_index(a, b)];
                    if v != 0.0 {
                        let (ga, gb) = (globals(a), globals(b));
                        h.push(ga.max(gb), ga.min(gb), v);
                    }
                }
            }
        };
        for (ph, block) in self.phases.iter().enumerate() {
            let d = block.layout.dims;
            let pattern = &block.node_pattern;
            let na = pattern.active.len();
            let integral_multipliers: Vec<f64> = (0..d.nintegrals)
                .map(|q| lambda[block.integral_row(q)])
                .collect();
            let mut weights = vec![0.0; block.layout.node_outputs()];
            for (k, node) in ev.nodes[ph].iter().enumerate() {
                for i in 0..d.nstates {
                    weights[i] = -block.coll.b_by_node[k]
                        .iter()
                        .map(|&(r, b)| b * lambda[block.defect_row(r, i)])
                        .sum::<f64>();
                }
                for j in 0..d.npath {
                    weights[d.nstates + j] = lambda[block.path_row(k, j)];
                }
                block.quadrature.hessian_weights(
                    &block.coll,
                    k,
                    obj_factor,
                    &integral_multipliers,
                    &mut weights,
                );
                let globals = |pos: usize| block.node_global(k, pattern.active[pos]);
                scatter(node.weighted_hessian(&weights), &globals, na);
            }
            let ep = &block.endpoint_pattern;
            let mut end_weights = vec![obj_factor; 1 + d.nevents];
            for e in 0..d.nevents {
                end_weights[1 + e] = lambda[block.event_row(e)];
            }
            let globals = |pos: usize| block.endpoint_global(ep.active[pos]);
            scatter(
                ev.endpoints[ph].weighted_hessian(&end_weights),
                &globals,
                ep.active.len(),
            );
        }
        if let (Some(link), Some(pattern)) = (&ev.linkages, &self.link_pattern) {
            let link_weights: Vec<f64> = (0..self.nlinkages)
                .map(|l| lambda[self.link_row_offset + l])
                .collect();
            let globals = |pos: usize| pattern.active[pos];
            scatter(
                link.weighted_hessian(&link_weights),
                &globals,
                pattern.active.len(),
            );
        }
        h
    }

    /// Largest defect residual at `x`, in the units of the states.
    pub fn max_defect(&self, x: &DVector<f64>) -> OcpResult<f64> {
        let (_, g) = self.eval_values(x)?;
        let mut worst: f64 = 0.0;
        for block in &self.phases {
            for r in 0..block.ndefect_rows() {
                worst = worst.max(g[block.row_offset + r].abs());
            }
        }
        Ok(worst)
    }
}

/// union of two probes of the same block family
fn merge_patterns(a: &BlockPattern, b: &BlockPattern) -> BlockPattern {
    let ninputs = a.ninputs;
    let noutputs = a.noutputs();
    let mut depends = vec![vec![false; ninputs]; noutputs];
    for pattern in [a, b] {
        for (o, nz) in pattern.output_nonzeros.iter().enumerate() {
            for &pos in nz {
                depends[o][pattern.active[pos]] = true;
            }
        }
    }
    let active: Vec<usize> = (0..ninputs)
        .filter(|&i| depends.iter().any(|row| row[i]))
        .collect();
    let output_nonzeros = depends
        .iter()
        .map(|row| {
            active
                .iter()
                .enumerate()
                .filter(|(_, i)| row[**i])
                .map(|(pos, _)| pos)
                .collect()
        })
        .collect();
    BlockPattern {
        ninputs,
        active,
        output_nonzeros,
    }
}

impl<'p> NlpProblem for DiscreteNlp<'p> {
    fn num_variables(&self) -> usize {
        self.nvars
    }

    fn num_constraints(&self) -> usize {
        self.ncons
    }

    fn bounds(&self) -> NlpBounds {
        self.bounds.clone()
    }

    fn initial_point(&self) -> DVector<f64> {
        self.x0.clone()
    }

    fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
        let ev = self.evaluate_point(x, DerivativeOrder::Values)?;
        Ok(self.assemble_values(x, &ev))
    }

    fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
        let ev = self.evaluate_point(x, DerivativeOrder::First)?;
        let (objective, constraints) = self.assemble_values(x, &ev);
        let (gradient, jacobian) = self.assemble_jacobian(&ev);
        debug!("jacobian assembled with {} entries", jacobian.nnz());
        Ok(FirstOrder {
            objective,
            constraints,
            gradient,
            jacobian,
        })
    }

    fn eval_hessian(
        &self,
        x: &DVector<f64>,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> OcpResult<SparseTriplets> {
        let ev = self.evaluate_point(x, DerivativeOrder::Second)?;
        Ok(self.assemble_hessian(&ev, obj_factor, lambda))
    }
}
