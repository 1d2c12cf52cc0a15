//! # Primal-dual interior point method
//!
//! Solves the general NLP of [`NlpProblem`]:
//!
//! min f(x)  s.t.  g_l <= g(x) <= g_u,  x_l <= x <= x_u
//!
//! The iteration follows the IPOPT line of algorithms:
//! - fixed variables (x_l == x_u) are removed, every inequality row gets a bounded slack,
//!   so the solver works on w = [x_free, s] with equality constraints C(w) = 0;
//! - finite bounds are relaxed by a relative 1e-8 so that an equality constraint
//!   sitting on a bound still leaves a strict interior; the returned x is projected
//!   back onto the original variable bounds;
//! - a log barrier with a monotone (Fiacco–McCormick) update of μ;
//! - the Newton step comes from the primal-dual KKT system
//!   [[W + Σ + δw I, Jᵀ], [J, −δc I]] [dw; λ⁺] = −[∇φ_μ; C],
//!   factorized with faer sparse LU (or nalgebra dense LU); since LU gives no inertia,
//!   curvature is checked along the computed step and δw is increased until
//!   dwᵀ(W + Σ + δw I)dw is positive and the step is not orders of magnitude longer
//!   than the iterate and the right hand side (a nearly singular system); δc grows
//!   while the multipliers of the step are unbounded (inconsistent linearization);
//! - fraction-to-boundary rule for primal and dual steps;
//! - backtracking on the ℓ1 merit function φ_μ(w) + ν‖C(w)‖₁, where ν and the
//!   directional derivative use the decrease of ‖C‖₁ predicted by the linearization;
//!   up to four second order corrections are tried when the full step is rejected;
//! - least squares estimates of the initial equality multipliers;
//! - the bound multipliers are kept within a factor κ_Σ of their central path values.
//!
//! Failed callback evaluations during the line search only shorten the step. The solver
//! moves through the states `Initializing → Iterating → {Converged,
//! MaxIterationsReached, Infeasible, NumericalFailure}`.
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::optimization::bfgs::DampedBfgs;
use crate::numerical::optimization::nlp_problem::{NlpBounds, NlpProblem, is_finite_bound};
use crate::somelinalg::kkt_solvers::{KktFactorization, LinearSolverKind};
use crate::somelinalg::sparse_triplets::SparseTriplets;
use log::{debug, error, info, warn};
use nalgebra::DVector;
use std::time::{Duration, Instant};
use strum_macros::{Display, EnumString};

/// Source of the Hessian of the Lagrangian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum HessianApproximation {
    #[strum(to_string = "exact")]
    Exact,
    /// damped BFGS quasi-Newton approximation
    #[strum(to_string = "limited-memory", serialize = "bfgs", serialize = "quasi-newton")]
    LimitedMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SolverStatus {
    Initializing,
    Iterating,
    Converged,
    MaxIterationsReached,
    Infeasible,
    NumericalFailure,
}

impl SolverStatus {
    pub fn is_success(&self) -> bool {
        *self == SolverStatus::Converged
    }
}

#[derive(Debug, Clone)]
pub struct InteriorPointOptions {
    pub tol: f64,                        // scaled NLP error tolerance
    pub max_iter: usize,                 // maximum number of iterations
    pub mu_init: f64,                    // initial barrier parameter
    pub warm_start_mu_init: f64,         // initial barrier parameter for warm starts
    pub warm_start: bool,                // bound multipliers start on the central path
    pub linear_solver: LinearSolverKind, // KKT back end
    pub hessian: HessianApproximation,   // exact or quasi-Newton
    pub bound_push: f64,                 // κ1
    pub bound_frac: f64,                 // κ2
}

impl Default for InteriorPointOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 1000,
            mu_init: 0.1,
            warm_start_mu_init: 1e-4,
            warm_start: false,
            linear_solver: LinearSolverKind::SparseLu,
            hessian: HessianApproximation::Exact,
            bound_push: 1e-2,
            bound_frac: 1e-2,
        }
    }
}

/// Result of an interior point run, in the variables of the NLP passed in.
#[derive(Debug, Clone)]
pub struct NlpResult {
    pub status: SolverStatus,
    pub x: DVector<f64>,
    /// multipliers of g, with ∇f + Jᵀλ − z_l + z_u = 0
    pub lambda: DVector<f64>,
    pub z_lower: DVector<f64>,
    pub z_upper: DVector<f64>,
    pub objective: f64,
    pub constraint_violation: f64,
    pub dual_infeasibility: f64,
    pub iterations: usize,
    pub mu: f64,
    pub elapsed: Duration,
    pub message: String,
}

const KAPPA_EPS: f64 = 10.0;
const KAPPA_MU: f64 = 0.2;
const THETA_MU: f64 = 1.5;
const KAPPA_SIGMA: f64 = 1e10;
const S_MAX: f64 = 100.0;
const ARMIJO_ETA: f64 = 1e-4;
const PENALTY_RHO: f64 = 0.1;
const ALPHA_MIN: f64 = 1e-12;
const MAX_LS_FAILURES: usize = 5;
const LAMBDA_MAX_INIT: f64 = 1e3;
const DELTA_W_FIRST: f64 = 1e-4;
const DELTA_W_MIN: f64 = 1e-20;
const DELTA_W_MAX: f64 = 1e40;
const DELTA_C: f64 = 1e-8;
const DELTA_C_GROWTH: f64 = 100.0;
const DELTA_C_MAX: f64 = 1.0;
const CURVATURE_TOL: f64 = 1e-8;
const STEP_RATIO_MAX: f64 = 1e4;
const NU_MAX: f64 = 1e10;
const BOUND_RELAX: f64 = 1e-8;
const MAX_SOC: usize = 4;
const KAPPA_SOC: f64 = 0.99;

/// bound moved outwards by BOUND_RELAX relative to its magnitude
fn relax_lower(l: f64) -> f64 {
    if is_finite_bound(l) {
        l - BOUND_RELAX * l.abs().max(1.0)
    } else {
        l
    }
}

fn relax_upper(u: f64) -> f64 {
    if is_finite_bound(u) {
        u + BOUND_RELAX * u.abs().max(1.0)
    } else {
        u
    }
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0_f64, |a, x| a.max(x.abs()))
}

fn l1_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// Reformulated problem: free variables and slacks, equality constraints only.
struct Layout {
    n: usize,
    m: usize,
    free: Vec<usize>,
    position: Vec<Option<usize>>,
    x_template: DVector<f64>,
    slack_of_row: Vec<Option<usize>>,
    row_target: Vec<f64>,
    /// unrelaxed bounds of the free variables
    original: Vec<(f64, f64)>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    has_lower: Vec<bool>,
    has_upper: Vec<bool>,
}

impl Layout {
    fn new(bounds: &NlpBounds, n: usize, m: usize) -> OcpResult<Self> {
        if bounds.x_lower.len() != n
            || bounds.x_upper.len() != n
            || bounds.g_lower.len() != m
            || bounds.g_upper.len() != m
        {
            return Err(OcpError::config("NLP bounds do not match the problem dimensions"));
        }
        let mut free = Vec::new();
        let mut position = vec![None; n];
        let mut x_template = DVector::zeros(n);
        let mut original = Vec::new();
        let (mut lower, mut upper, mut has_lower, mut has_upper) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for i in 0..n {
            let (l, u) = (bounds.x_lower[i], bounds.x_upper[i]);
            if l > u {
                return Err(OcpError::config(format!(
                    "variable {} has lower bound {} above upper bound {}",
                    i, l, u
                )));
            }
            if is_finite_bound(l) && is_finite_bound(u) && (u - l) <= 1e-14 * (1.0 + l.abs()) {
                x_template[i] = l;
                continue;
            }
            position[i] = Some(free.len());
            free.push(i);
            original.push((l, u));
            lower.push(relax_lower(l));
            upper.push(relax_upper(u));
            has_lower.push(is_finite_bound(l));
            has_upper.push(is_finite_bound(u));
        }
        let mut slack_of_row = vec![None; m];
        let mut row_target = vec![0.0; m];
        let mut nslack = 0;
        for r in 0..m {
            let (l, u) = (bounds.g_lower[r], bounds.g_upper[r]);
            if l > u {
                return Err(OcpError::config(format!(
                    "constraint {} has lower bound {} above upper bound {}",
                    r, l, u
                )));
            }
            if is_finite_bound(l) && is_finite_bound(u) && (u - l) <= 1e-14 * (1.0 + l.abs()) {
                row_target[r] = l;
            } else {
                slack_of_row[r] = Some(free.len() + nslack);
                nslack += 1;
                lower.push(relax_lower(l));
                upper.push(relax_upper(u));
                has_lower.push(is_finite_bound(l));
                has_upper.push(is_finite_bound(u));
            }
        }
        Ok(Layout {
            n,
            m,
            free,
            position,
            x_template,
            slack_of_row,
            row_target,
            original,
            lower,
            upper,
            has_lower,
            has_upper,
        })
    }

    fn nfree(&self) -> usize {
        self.free.len()
    }

    fn nw(&self) -> usize {
        self.lower.len()
    }

    fn nbounds(&self) -> usize {
        self.has_lower.iter().filter(|b| **b).count() + self.has_upper.iter().filter(|b| **b).count()
    }

    fn full_x(&self, w: &DVector<f64>) -> DVector<f64> {
        let mut x = self.x_template.clone();
        for (k, &i) in self.free.iter().enumerate() {
            x[i] = w[k];
        }
        x
    }

    /// x with every free variable clipped to its unrelaxed bounds
    fn project_to_original(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut projected = x.clone();
        for (k, &i) in self.free.iter().enumerate() {
            let (l, u) = self.original[k];
            projected[i] = projected[i].max(l).min(u);
        }
        projected
    }

    fn constraints(&self, g: &DVector<f64>, w: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.m, |r, _| match self.slack_of_row[r] {
            Some(s) => g[r] - w[s],
            None => g[r] - self.row_target[r],
        })
    }

    fn gradient(&self, grad_x: &DVector<f64>) -> DVector<f64> {
        let mut grad = DVector::zeros(self.nw());
        for (k, &i) in self.free.iter().enumerate() {
            grad[k] = grad_x[i];
        }
        grad
    }

    fn jacobian(&self, jac_x: &SparseTriplets) -> SparseTriplets {
        let mut jac = SparseTriplets::with_capacity(self.m, self.nw(), jac_x.nnz() + self.m);
        for &(r, c, v) in &jac_x.entries {
            if let Some(k) = self.position[c] {
                jac.push(r, k, v);
            }
        }
        for r in 0..self.m {
            if let Some(s) = self.slack_of_row[r] {
                jac.push(r, s, -1.0);
            }
        }
        jac
    }

    /// lower triangle of the Hessian restricted to the free variables
    fn hessian(&self, hess_x: &SparseTriplets) -> SparseTriplets {
        let mut hess = SparseTriplets::with_capacity(self.nw(), self.nw(), hess_x.nnz());
        for &(r, c, v) in &hess_x.entries {
            if let (Some(a), Some(b)) = (self.position[r], self.position[c]) {
                hess.push(a.max(b), a.min(b), v);
            }
        }
        hess
    }

    fn push_inside(&self, k: usize, value: f64, k1: f64, k2: f64) -> f64 {
        let (l, u) = (self.lower[k], self.upper[k]);
        match (self.has_lower[k], self.has_upper[k]) {
            (true, true) => {
                let pl = (k1 * l.abs().max(1.0)).min(k2 * (u - l));
                let pu = (k1 * u.abs().max(1.0)).min(k2 * (u - l));
                value.max(l + pl).min(u - pu)
            }
            (true, false) => value.max(l + k1 * l.abs().max(1.0)),
            (false, true) => value.min(u - k1 * u.abs().max(1.0)),
            (false, false) => value,
        }
    }

    /// −μ Σ ln(w − l) − μ Σ ln(u − w); infinity outside the box
    fn barrier(&self, w: &DVector<f64>, mu: f64) -> f64 {
        let mut b = 0.0;
        for k in 0..self.nw() {
            if self.has_lower[k] {
                let s = w[k] - self.lower[k];
                if s <= 0.0 {
                    return f64::INFINITY;
                }
                b -= mu * s.ln();
            }
            if self.has_upper[k] {
                let s = self.upper[k] - w[k];
                if s <= 0.0 {
                    return f64::INFINITY;
                }
                b -= mu * s.ln();
            }
        }
        b
    }

    fn slack_lower(&self, w: &DVector<f64>, k: usize) -> f64 {
        w[k] - self.lower[k]
    }

    fn slack_upper(&self, w: &DVector<f64>, k: usize) -> f64 {
        self.upper[k] - w[k]
    }

    /// largest α ∈ (0, 1] with w + α dw strictly inside the box (fraction to boundary)
    fn max_primal_step(&self, w: &DVector<f64>, dw: &DVector<f64>, tau: f64) -> f64 {
        let mut alpha: f64 = 1.0;
        for k in 0..self.nw() {
            if self.has_lower[k] && dw[k] < 0.0 {
                alpha = alpha.min(-tau * self.slack_lower(w, k) / dw[k]);
            }
            if self.has_upper[k] && dw[k] > 0.0 {
                alpha = alpha.min(tau * self.slack_upper(w, k) / dw[k]);
            }
        }
        alpha
    }
}

fn max_dual_step(z: &DVector<f64>, dz: &DVector<f64>, active: &[bool], tau: f64) -> f64 {
    let mut alpha: f64 = 1.0;
    for k in 0..z.len() {
        if active[k] && dz[k] < 0.0 {
            alpha = alpha.min(-tau * z[k] / dz[k]);
        }
    }
    alpha
}

/// callback values and derivatives at one iterate, in w-space
struct Point {
    x: DVector<f64>,
    f: f64,
    c: DVector<f64>,
    grad: DVector<f64>,
    jac: SparseTriplets,
}

struct OptimalityError {
    dual: f64,
    primal: f64,
    complementarity: f64,
    total: f64,
}

struct Step {
    dw: DVector<f64>,
    lambda_plus: DVector<f64>,
    kkt: KktFactorization,
    delta_w: f64,
}

/// Interior point driver bound to one NLP.
pub struct InteriorPoint<'a, P: NlpProblem + ?Sized> {
    problem: &'a P,
    pub options: InteriorPointOptions,
    pub status: SolverStatus,
    delta_w_last: f64,
}

impl<'a, P: NlpProblem + ?Sized> InteriorPoint<'a, P> {
    pub fn new(problem: &'a P, options: InteriorPointOptions) -> Self {
        InteriorPoint {
            problem,
            options,
            status: SolverStatus::Initializing,
            delta_w_last: 0.0,
        }
    }

    fn evaluate(&self, layout: &Layout, w: &DVector<f64>) -> OcpResult<Point> {
        let x = layout.full_x(w);
        let fo = self.problem.eval_first_order(&x)?;
        if !fo.objective.is_finite()
            || fo.constraints.iter().any(|v| !v.is_finite())
            || fo.gradient.iter().any(|v| !v.is_finite())
            || fo.jacobian.entries.iter().any(|e| !e.2.is_finite())
        {
            return Err(OcpError::numerical("non-finite NLP function or derivative value"));
        }
        Ok(Point {
            f: fo.objective,
            c: layout.constraints(&fo.constraints, w),
            grad: layout.gradient(&fo.gradient),
            jac: layout.jacobian(&fo.jacobian),
            x,
        })
    }

    /// (f, C) at a trial point, None when the callbacks fail there
    fn evaluate_values(&self, layout: &Layout, w: &DVector<f64>) -> Option<(f64, DVector<f64>)> {
        let x = layout.full_x(w);
        match self.problem.eval_values(&x) {
            Ok((f, g)) if f.is_finite() && g.iter().all(|v| v.is_finite()) => {
                Some((f, layout.constraints(&g, w)))
            }
            Ok(_) => None,
            Err(e) => {
                debug!("trial point rejected: {}", e);
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn optimality_error(
        &self,
        layout: &Layout,
        pt: &Point,
        w: &DVector<f64>,
        lambda: &DVector<f64>,
        zl: &DVector<f64>,
        zu: &DVector<f64>,
        mu: f64,
    ) -> OptimalityError {
        let rd = &pt.grad + pt.jac.transpose_mul_vec(lambda) - zl + zu;
        let dual = inf_norm(&rd);
        let primal = inf_norm(&pt.c);
        let mut complementarity: f64 = 0.0;
        for k in 0..layout.nw() {
            if layout.has_lower[k] {
                complementarity = complementarity.max((zl[k] * layout.slack_lower(w, k) - mu).abs());
            }
            if layout.has_upper[k] {
                complementarity = complementarity.max((zu[k] * layout.slack_upper(w, k) - mu).abs());
            }
        }
        let nb = layout.nbounds();
        let z1 = l1_norm(zl) + l1_norm(zu);
        let sd = ((l1_norm(lambda) + z1) / ((layout.m + nb).max(1) as f64)).max(S_MAX) / S_MAX;
        let sc = (z1 / (nb.max(1) as f64)).max(S_MAX) / S_MAX;
        OptimalityError {
            dual,
            primal,
            complementarity,
            total: (dual / sd).max(primal).max(complementarity / sc),
        }
    }

    fn assemble_kkt(
        layout: &Layout,
        hess: &SparseTriplets,
        jac: &SparseTriplets,
        sigma: &DVector<f64>,
        delta_w: f64,
        delta_c: f64,
    ) -> SparseTriplets {
        let nw = layout.nw();
        let dim = nw + layout.m;
        let mut k = SparseTriplets::with_capacity(
            dim,
            dim,
            2 * hess.nnz() + 2 * jac.nnz() + dim,
        );
        for &(r, c, v) in &hess.entries {
            k.push(r, c, v);
            if r != c {
                k.push(c, r, v);
            }
        }
        for i in 0..nw {
            k.push(i, i, sigma[i] + delta_w);
        }
        for &(r, c, v) in &jac.entries {
            k.push(nw + r, c, v);
            k.push(c, nw + r, v);
        }
        for i in 0..layout.m {
            k.push(nw + i, nw + i, -delta_c);
        }
        k
    }

    /// Solve the KKT system, regularizing until the step has positive curvature and a
    /// sane length compared to the iterate (`w_norm`) and the right hand side. Huge
    /// multipliers mean the linearized constraints are inconsistent; δc then grows
    /// until they are bounded, which turns the step into a penalty step.
    #[allow(clippy::too_many_arguments)]
    fn compute_step(
        &mut self,
        layout: &Layout,
        hess: &SparseTriplets,
        jac: &SparseTriplets,
        sigma: &DVector<f64>,
        rhs: &DVector<f64>,
        mu: f64,
        w_norm: f64,
    ) -> Option<Step> {
        let nw = layout.nw();
        let m = layout.m;
        let step_limit = STEP_RATIO_MAX * (1.0 + w_norm.max(inf_norm(rhs)));
        let multiplier_limit = STEP_RATIO_MAX * (1.0 + inf_norm(rhs));
        let mut delta_w = 0.0;
        let mut delta_c = 0.0;
        loop {
            let kkt_matrix = Self::assemble_kkt(layout, hess, jac, sigma, delta_w, delta_c);
            let solved = KktFactorization::factorize(&kkt_matrix, self.options.linear_solver)
                .and_then(|f| f.solve(rhs).map(|sol| (f, sol)));
            match solved {
                None if delta_c == 0.0 && m > 0 => {
                    delta_c = DELTA_C * mu.powf(0.25);
                    debug!("KKT matrix singular, δc = {:.2e}", delta_c);
                    continue;
                }
                None => {}
                Some((kkt, sol)) => {
                    let lambda_plus = sol.rows(nw, m).into_owned();
                    // inconsistent linearized constraints blow up the multipliers
                    if m > 0 && delta_c < DELTA_C_MAX && inf_norm(&lambda_plus) > multiplier_limit {
                        delta_c = if delta_c == 0.0 {
                            DELTA_C * mu.powf(0.25)
                        } else {
                            (delta_c * DELTA_C_GROWTH).min(DELTA_C_MAX)
                        };
                        debug!(
                            "multipliers of size {:.2e}, δc = {:.2e}",
                            inf_norm(&lambda_plus),
                            delta_c
                        );
                        continue;
                    }
                    let dw = sol.rows(0, nw).into_owned();
                    let mut curvature = hess.symmetric_mul_vec(&dw).dot(&dw);
                    for i in 0..nw {
                        curvature += (sigma[i] + delta_w) * dw[i] * dw[i];
                    }
                    let length = inf_norm(&dw);
                    if curvature < CURVATURE_TOL * dw.norm_squared() {
                        debug!(
                            "curvature {:.2e} too small with δw = {:.2e}",
                            curvature, delta_w
                        );
                    } else if length > step_limit {
                        if delta_c == 0.0 && m > 0 {
                            delta_c = DELTA_C * mu.powf(0.25);
                            debug!(
                                "step of length {:.2e} from a nearly singular KKT matrix, δc = {:.2e}",
                                length, delta_c
                            );
                            continue;
                        }
                        debug!("step of length {:.2e} rejected with δw = {:.2e}", length, delta_w);
                    } else {
                        if delta_w > 0.0 {
                            self.delta_w_last = delta_w;
                        }
                        return Some(Step {
                            dw,
                            lambda_plus,
                            kkt,
                            delta_w,
                        });
                    }
                }
            }
            delta_w = if delta_w == 0.0 {
                if self.delta_w_last == 0.0 {
                    DELTA_W_FIRST
                } else {
                    (self.delta_w_last / 3.0).max(DELTA_W_MIN)
                }
            } else if self.delta_w_last == 0.0 {
                delta_w * 100.0
            } else {
                delta_w * 8.0
            };
            if delta_w > DELTA_W_MAX {
                error!("curvature regularization exceeded {:e}", DELTA_W_MAX);
                return None;
            }
        }
    }

    /// least squares multipliers: [I Jᵀ; J 0][d; λ] = [−(∇f − z_l + z_u); 0]
    fn initial_multipliers(
        &self,
        layout: &Layout,
        pt: &Point,
        zl: &DVector<f64>,
        zu: &DVector<f64>,
    ) -> DVector<f64> {
        let (nw, m) = (layout.nw(), layout.m);
        if m == 0 {
            return DVector::zeros(0);
        }
        let mut k = SparseTriplets::with_capacity(nw + m, nw + m, nw + m + 2 * pt.jac.nnz());
        for i in 0..nw {
            k.push(i, i, 1.0);
        }
        for &(r, c, v) in &pt.jac.entries {
            k.push(nw + r, c, v);
            k.push(c, nw + r, v);
        }
        for i in 0..m {
            k.push(nw + i, nw + i, -DELTA_C);
        }
        let mut rhs = DVector::zeros(nw + m);
        let top = -(&pt.grad - zl + zu);
        rhs.rows_mut(0, nw).copy_from(&top);
        let lambda = KktFactorization::factorize(&k, self.options.linear_solver)
            .and_then(|f| f.solve(&rhs))
            .map(|sol| sol.rows(nw, m).into_owned());
        match lambda {
            Some(l) if inf_norm(&l) <= LAMBDA_MAX_INIT => l,
            _ => {
                debug!("least squares multipliers rejected, starting from λ = 0");
                DVector::zeros(m)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        layout: &Layout,
        pt: &Point,
        lambda: &DVector<f64>,
        zl: &DVector<f64>,
        zu: &DVector<f64>,
        err: &OptimalityError,
        iterations: usize,
        mu: f64,
        start: Instant,
    ) -> NlpResult {
        let mut z_lower = DVector::zeros(layout.n);
        let mut z_upper = DVector::zeros(layout.n);
        for (k, &i) in layout.free.iter().enumerate() {
            z_lower[i] = zl[k];
            z_upper[i] = zu[k];
        }
        NlpResult {
            status: self.status,
            x: layout.project_to_original(&pt.x),
            lambda: lambda.clone(),
            z_lower,
            z_upper,
            objective: pt.f,
            constraint_violation: err.primal,
            dual_infeasibility: err.dual,
            iterations,
            mu,
            elapsed: start.elapsed(),
            message: self.status.to_string(),
        }
    }

    fn failure_without_point(&mut self, start: Instant, reason: &OcpError) -> NlpResult {
        self.status = SolverStatus::NumericalFailure;
        error!("interior point: evaluation at the initial point failed: {}", reason);
        let n = self.problem.num_variables();
        let m = self.problem.num_constraints();
        NlpResult {
            status: self.status,
            x: self.problem.initial_point(),
            lambda: DVector::zeros(m),
            z_lower: DVector::zeros(n),
            z_upper: DVector::zeros(n),
            objective: f64::NAN,
            constraint_violation: f64::INFINITY,
            dual_infeasibility: f64::INFINITY,
            iterations: 0,
            mu: self.options.mu_init,
            elapsed: start.elapsed(),
            message: reason.to_string(),
        }
    }

    /// Run the method. Returns `Err` only for malformed problems; every outcome of
    /// the iteration itself is reported through [`NlpResult::status`].
    pub fn solve(&mut self) -> OcpResult<NlpResult> {
        let start = Instant::now();
        self.status = SolverStatus::Initializing;
        self.delta_w_last = 0.0;
        let opts = self.options.clone();
        let layout = Layout::new(
            &self.problem.bounds(),
            self.problem.num_variables(),
            self.problem.num_constraints(),
        )?;
        let (nw, nf, m) = (layout.nw(), layout.nfree(), layout.m);

        // STEP 0: INITIAL POINT
        let x0 = self.problem.initial_point();
        if x0.len() != layout.n {
            return Err(OcpError::config("initial point has the wrong length"));
        }
        let mut w = DVector::zeros(nw);
        for (k, &i) in layout.free.iter().enumerate() {
            w[k] = layout.push_inside(k, x0[i], opts.bound_push, opts.bound_frac);
        }
        let g0 = match self.problem.eval_values(&layout.full_x(&w)) {
            Ok((_, g)) => g,
            Err(e) => return Ok(self.failure_without_point(start, &e)),
        };
        for r in 0..m {
            if let Some(s) = layout.slack_of_row[r] {
                w[s] = layout.push_inside(s, g0[r], opts.bound_push, opts.bound_frac);
            }
        }
        let mut pt = match self.evaluate(&layout, &w) {
            Ok(pt) => pt,
            Err(e) => return Ok(self.failure_without_point(start, &e)),
        };
        let mut mu = if opts.warm_start {
            opts.warm_start_mu_init
        } else {
            opts.mu_init
        };
        let mu_min = opts.tol / 10.0;
        let mut zl = DVector::zeros(nw);
        let mut zu = DVector::zeros(nw);
        for k in 0..nw {
            if layout.has_lower[k] {
                zl[k] = if opts.warm_start {
                    mu / layout.slack_lower(&w, k)
                } else {
                    1.0
                };
            }
            if layout.has_upper[k] {
                zu[k] = if opts.warm_start {
                    mu / layout.slack_upper(&w, k)
                } else {
                    1.0
                };
            }
        }
        let mut lambda = self.initial_multipliers(&layout, &pt, &zl, &zu);
        let mut bfgs = match opts.hessian {
            HessianApproximation::Exact => None,
            HessianApproximation::LimitedMemory => Some(DampedBfgs::new(nf)),
        };
        info!(
            "interior point: {} variables ({} fixed), {} constraints ({} with slacks), μ0 = {:.1e}",
            layout.n,
            layout.n - nf,
            m,
            nw - nf,
            mu
        );
        info!(
            "{:>4} {:>15} {:>9} {:>9} {:>8} {:>9} {:>8} {:>9} {:>3}",
            "iter", "objective", "inf_pr", "inf_du", "mu", "||d||", "reg", "alpha", "ls"
        );

        let mut nu: f64 = 1.0;
        let mut ls_failures = 0;
        let mut iter = 0;
        let mut last_alpha = 0.0;
        let mut last_reg = 0.0;
        let mut last_norm_d = 0.0;
        let mut last_ls = 0;
        self.status = SolverStatus::Iterating;
        let err = loop {
            // STEP 1: CONVERGENCE TEST
            let err = self.optimality_error(&layout, &pt, &w, &lambda, &zl, &zu, 0.0);
            info!(
                "{:>4} {:>15.8e} {:>9.2e} {:>9.2e} {:>8.1e} {:>9.2e} {:>8.1e} {:>9.2e} {:>3}",
                iter, pt.f, err.primal, err.dual, mu, last_norm_d, last_reg, last_alpha, last_ls
            );
            if err.total <= opts.tol {
                self.status = SolverStatus::Converged;
                break err;
            }
            if iter >= opts.max_iter {
                self.status = SolverStatus::MaxIterationsReached;
                break err;
            }

            // STEP 2: BARRIER PARAMETER UPDATE
            loop {
                let e_mu = self.optimality_error(&layout, &pt, &w, &lambda, &zl, &zu, mu);
                if e_mu.total > KAPPA_EPS * mu || mu <= mu_min {
                    break;
                }
                let new_mu = (KAPPA_MU * mu).min(mu.powf(THETA_MU)).max(mu_min);
                if new_mu >= mu {
                    break;
                }
                mu = new_mu;
                debug!("μ decreased to {:.3e}", mu);
            }

            // STEP 3: HESSIAN OF THE LAGRANGIAN
            let hess = match &bfgs {
                Some(b) => {
                    let mut h = b.to_lower_triplets();
                    h.nrows = nw;
                    h.ncols = nw;
                    h
                }
                None => match self.problem.eval_hessian(&pt.x, 1.0, &lambda) {
                    Ok(h) if h.entries.iter().all(|e| e.2.is_finite()) => layout.hessian(&h),
                    Ok(_) => {
                        error!("non-finite Hessian of the Lagrangian");
                        self.status = SolverStatus::NumericalFailure;
                        break err;
                    }
                    Err(e) => {
                        error!("Hessian evaluation failed: {}", e);
                        self.status = SolverStatus::NumericalFailure;
                        break err;
                    }
                },
            };

            // STEP 4: NEWTON STEP
            let mut sigma = DVector::zeros(nw);
            let mut grad_phi = pt.grad.clone();
            for k in 0..nw {
                if layout.has_lower[k] {
                    let s = layout.slack_lower(&w, k);
                    sigma[k] += zl[k] / s;
                    grad_phi[k] -= mu / s;
                }
                if layout.has_upper[k] {
                    let s = layout.slack_upper(&w, k);
                    sigma[k] += zu[k] / s;
                    grad_phi[k] += mu / s;
                }
            }
            let mut rhs = DVector::zeros(nw + m);
            rhs.rows_mut(0, nw).copy_from(&(-&grad_phi));
            rhs.rows_mut(nw, m).copy_from(&(-&pt.c));
            let w_norm = inf_norm(&w);
            let step = match self.compute_step(&layout, &hess, &pt.jac, &sigma, &rhs, mu, w_norm) {
                Some(step) => step,
                None => {
                    error!("could not compute a Newton step at iteration {}", iter);
                    self.status = SolverStatus::NumericalFailure;
                    break err;
                }
            };
            let dw = &step.dw;
            let dlambda = &step.lambda_plus - &lambda;
            let mut dzl = DVector::zeros(nw);
            let mut dzu = DVector::zeros(nw);
            for k in 0..nw {
                if layout.has_lower[k] {
                    let s = layout.slack_lower(&w, k);
                    dzl[k] = mu / s - zl[k] - zl[k] / s * dw[k];
                }
                if layout.has_upper[k] {
                    let s = layout.slack_upper(&w, k);
                    dzu[k] = mu / s - zu[k] + zu[k] / s * dw[k];
                }
            }

            // STEP 5: FRACTION TO THE BOUNDARY
            let tau = (1.0 - mu).max(0.99);
            let alpha_max = layout.max_primal_step(&w, dw, tau);
            let alpha_z = max_dual_step(&zl, &dzl, &layout.has_lower, tau)
                .min(max_dual_step(&zu, &dzu, &layout.has_upper, tau));

            // STEP 6: LINE SEARCH ON THE l1 MERIT FUNCTION
            let theta = l1_norm(&pt.c);
            // decrease of ‖C‖₁ predicted by the linearization, below θ when δc > 0
            let predicted = if m > 0 {
                (theta - l1_norm(&(&pt.c + pt.jac.mul_vec(dw)))).max(0.0)
            } else {
                0.0
            };
            let dphi = grad_phi.dot(dw);
            let mut curvature = hess.symmetric_mul_vec(dw).dot(dw);
            for k in 0..nw {
                curvature += sigma[k] * dw[k] * dw[k];
            }
            if predicted > 0.0 {
                let half_curv = if curvature > 0.0 { 0.5 * curvature } else { 0.0 };
                let nu_trial = (dphi + half_curv) / ((1.0 - PENALTY_RHO) * predicted);
                if nu < nu_trial && nu < NU_MAX {
                    nu = (nu_trial + 1.0).min(NU_MAX);
                    if nu == NU_MAX {
                        warn!("penalty parameter capped at {:.1e}", NU_MAX);
                    } else {
                        debug!("penalty parameter raised to {:.3e}", nu);
                    }
                }
            }
            let merit0 = pt.f + layout.barrier(&w, mu) + nu * theta;
            let dmerit = dphi - nu * predicted;
            let merit_slack = 10.0 * f64::EPSILON * merit0.abs().max(1.0);
            let merit_at = |f: f64, c: &DVector<f64>, wt: &DVector<f64>| -> f64 {
                f + layout.barrier(wt, mu) + nu * l1_norm(c)
            };

            let mut alpha = alpha_max;
            let mut accepted: Option<(DVector<f64>, f64)> = None;
            let mut fallback: Option<(DVector<f64>, f64)> = None;
            let mut trials = 0;
            let mut soc_tried = false;
            // the fraction to the boundary step is always tried, however short
            loop {
                trials += 1;
                let w_trial = &w + alpha * dw;
                if let Some((f_trial, c_trial)) = self.evaluate_values(&layout, &w_trial) {
                    let merit = merit_at(f_trial, &c_trial, &w_trial);
                    if merit.is_finite() {
                        if fallback.is_none() {
                            fallback = Some((w_trial.clone(), alpha));
                        }
                        if merit <= merit0 + ARMIJO_ETA * alpha * dmerit + merit_slack {
                            accepted = Some((w_trial, alpha));
                            break;
                        }
                        // second order corrections for the rejected first trial step
                        if !soc_tried && alpha == alpha_max && m > 0 {
                            soc_tried = true;
                            let mut c_soc = alpha * &pt.c + &c_trial;
                            let mut theta_old = l1_norm(&c_trial);
                            for p in 0..MAX_SOC {
                                let mut rhs_soc = rhs.clone();
                                rhs_soc.rows_mut(nw, m).copy_from(&(-&c_soc));
                                let Some(sol) = step.kkt.solve(&rhs_soc) else {
                                    break;
                                };
                                let dw_soc = sol.rows(0, nw).into_owned();
                                let alpha_soc = layout.max_primal_step(&w, &dw_soc, tau);
                                let w_soc = &w + alpha_soc * &dw_soc;
                                let Some((f_soc, c_new)) = self.evaluate_values(&layout, &w_soc) else {
                                    break;
                                };
                                let merit_soc = merit_at(f_soc, &c_new, &w_soc);
                                if merit_soc <= merit0 + ARMIJO_ETA * alpha * dmerit + merit_slack {
                                    debug!("second order correction {} accepted", p + 1);
                                    accepted = Some((w_soc, alpha));
                                    break;
                                }
                                let theta_soc = l1_norm(&c_new);
                                if theta_soc > KAPPA_SOC * theta_old {
                                    break;
                                }
                                theta_old = theta_soc;
                                c_soc = alpha_soc * c_soc + c_new;
                            }
                            if accepted.is_some() {
                                break;
                            }
                        }
                    }
                }
                alpha *= 0.5;
                if alpha <= ALPHA_MIN {
                    break;
                }
            }
            let (w_new, alpha_used) = match accepted {
                Some(a) => {
                    ls_failures = 0;
                    a
                }
                None => {
                    ls_failures += 1;
                    warn!(
                        "line search failed at iteration {} ({} in a row)",
                        iter, ls_failures
                    );
                    if ls_failures >= MAX_LS_FAILURES {
                        self.status = if err.primal > opts.tol {
                            SolverStatus::Infeasible
                        } else {
                            SolverStatus::NumericalFailure
                        };
                        break err;
                    }
                    match fallback {
                        Some(f) => f,
                        None => {
                            error!("no finite trial point along the Newton direction");
                            self.status = SolverStatus::NumericalFailure;
                            break err;
                        }
                    }
                }
            };

            // STEP 7: ACCEPT THE STEP
            let new_pt = match self.evaluate(&layout, &w_new) {
                Ok(p) => p,
                Err(e) => {
                    error!("evaluation failed at the accepted point: {}", e);
                    self.status = SolverStatus::NumericalFailure;
                    break err;
                }
            };
            let lambda_new = &lambda + alpha_used * &dlambda;
            if let Some(b) = bfgs.as_mut() {
                let s = (&w_new - &w).rows(0, nf).into_owned();
                let grad_new = &new_pt.grad + new_pt.jac.transpose_mul_vec(&lambda_new);
                let grad_old = &pt.grad + pt.jac.transpose_mul_vec(&lambda_new);
                let y = (grad_new - grad_old).rows(0, nf).into_owned();
                b.update(&s, &y);
            }
            last_norm_d = inf_norm(&(&w_new - &w));
            w = w_new;
            pt = new_pt;
            lambda = lambda_new;
            zl += alpha_z * &dzl;
            zu += alpha_z * &dzu;
            // keep z within κ_Σ of μ / slack
            for k in 0..nw {
                if layout.has_lower[k] {
                    let s = layout.slack_lower(&w, k);
                    zl[k] = zl[k].max(mu / (KAPPA_SIGMA * s)).min(KAPPA_SIGMA * mu / s);
                }
                if layout.has_upper[k] {
                    let s = layout.slack_upper(&w, k);
                    zu[k] = zu[k].max(mu / (KAPPA_SIGMA * s)).min(KAPPA_SIGMA * mu / s);
                }
            }
            last_alpha = alpha_used;
            last_reg = step.delta_w;
            last_ls = trials;
            iter += 1;
        };

        match self.status {
            SolverStatus::Converged => info!(
                "interior point converged in {} iterations, objective {:.10e}, violation {:.2e}",
                iter, pt.f, err.primal
            ),
            SolverStatus::MaxIterationsReached => warn!(
                "interior point stopped after {} iterations, error {:.3e}",
                iter, err.total
            ),
            other => error!("interior point terminated with status {} at iteration {}", other, iter),
        }
        debug!(
            "final errors: dual {:.3e}, primal {:.3e}, complementarity {:.3e}",
            err.dual, err.primal, err.complementarity
        );
        Ok(self.result(&layout, &pt, &lambda, &zl, &zu, &err, iter, mu, start))
    }
}

/// Convenience wrapper: solve `problem` with `options`.
pub fn solve_nlp<P: NlpProblem + ?Sized>(
    problem: &P,
    options: InteriorPointOptions,
) -> OcpResult<NlpResult> {
    InteriorPoint::new(problem, options).solve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::optimization::nlp_problem::test_problems::{EqualityQp, Hs071};
    use crate::numerical::optimization::nlp_problem::{FirstOrder, NLP_INFINITY};
    use approx::assert_relative_eq;

    #[test]
    fn equality_constrained_quadratic() {
        let res = solve_nlp(&EqualityQp, InteriorPointOptions::default()).unwrap();
        assert_eq!(res.status, SolverStatus::Converged);
        assert_relative_eq!(res.x[0], 0.0, epsilon = 1e-7);
        assert_relative_eq!(res.x[1], 1.0, epsilon = 1e-7);
        assert_relative_eq!(res.lambda[0], 2.0, epsilon = 1e-6);
        assert!(res.iterations < 10);
    }

    #[test]
    fn hock_schittkowski_71() {
        let res = solve_nlp(&Hs071, InteriorPointOptions::default()).unwrap();
        assert_eq!(res.status, SolverStatus::Converged);
        assert_relative_eq!(res.objective, 17.0140173, epsilon = 1e-5);
        assert_relative_eq!(res.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(res.x[1], 4.7429994, epsilon = 1e-5);
        assert_relative_eq!(res.x[2], 3.8211503, epsilon = 1e-5);
        assert_relative_eq!(res.x[3], 1.3794082, epsilon = 1e-5);
    }

    #[test]
    fn dense_lu_and_bfgs_variants_converge() {
        let opts = InteriorPointOptions {
            linear_solver: LinearSolverKind::DenseLu,
            hessian: HessianApproximation::LimitedMemory,
            max_iter: 300,
            ..Default::default()
        };
        let res = solve_nlp(&Hs071, opts).unwrap();
        assert_eq!(res.status, SolverStatus::Converged);
        assert_relative_eq!(res.objective, 17.0140173, epsilon = 1e-4);
    }

    #[test]
    fn iteration_limit_is_reported() {
        let opts = InteriorPointOptions {
            max_iter: 1,
            ..Default::default()
        };
        let res = solve_nlp(&Hs071, opts).unwrap();
        assert_eq!(res.status, SolverStatus::MaxIterationsReached);
        assert_eq!(res.iterations, 1);
    }

    /// min x  s.t.  x >= 1 (as a bound) and 2 <= x^2 + 0 <= 3 (as a constraint)
    struct BoundAndRange;

    impl NlpProblem for BoundAndRange {
        fn num_variables(&self) -> usize {
            1
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> NlpBounds {
            NlpBounds {
                x_lower: DVector::from_element(1, 1.0),
                x_upper: DVector::from_element(1, NLP_INFINITY),
                g_lower: DVector::from_element(1, 2.0),
                g_upper: DVector::from_element(1, 3.0),
            }
        }
        fn initial_point(&self) -> DVector<f64> {
            DVector::from_element(1, 5.0)
        }
        fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
            Ok((x[0], DVector::from_element(1, x[0] * x[0])))
        }
        fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
            let mut jacobian = SparseTriplets::new(1, 1);
            jacobian.push(0, 0, 2.0 * x[0]);
            Ok(FirstOrder {
                objective: x[0],
                constraints: DVector::from_element(1, x[0] * x[0]),
                gradient: DVector::from_element(1, 1.0),
                jacobian,
            })
        }
        fn eval_hessian(
            &self,
            _x: &DVector<f64>,
            _obj_factor: f64,
            lambda: &DVector<f64>,
        ) -> OcpResult<SparseTriplets> {
            let mut h = SparseTriplets::new(1, 1);
            h.push(0, 0, 2.0 * lambda[0]);
            Ok(h)
        }
    }

    #[test]
    fn inequality_range_becomes_active() {
        let res = solve_nlp(&BoundAndRange, InteriorPointOptions::default()).unwrap();
        assert_eq!(res.status, SolverStatus::Converged);
        assert_relative_eq!(res.x[0], 2.0_f64.sqrt(), epsilon = 1e-6);
        assert!(res.z_lower[0] < 1e-5);
    }

    /// min (y - 1)² + x  s.t.  x >= 0 and the equality x = 0, repeated `copies` times
    struct EqualityOnBound {
        copies: usize,
    }

    impl NlpProblem for EqualityOnBound {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            self.copies
        }
        fn bounds(&self) -> NlpBounds {
            NlpBounds {
                x_lower: DVector::from_vec(vec![0.0, -NLP_INFINITY]),
                x_upper: DVector::from_element(2, NLP_INFINITY),
                g_lower: DVector::zeros(self.copies),
                g_upper: DVector::zeros(self.copies),
            }
        }
        fn initial_point(&self) -> DVector<f64> {
            DVector::from_vec(vec![0.5, -2.0])
        }
        fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
            let f = (x[1] - 1.0).powi(2) + x[0];
            Ok((f, DVector::from_element(self.copies, x[0])))
        }
        fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
            let (objective, constraints) = self.eval_values(x)?;
            let mut jacobian = SparseTriplets::new(self.copies, 2);
            for r in 0..self.copies {
                jacobian.push(r, 0, 1.0);
            }
            Ok(FirstOrder {
                objective,
                constraints,
                gradient: DVector::from_vec(vec![1.0, 2.0 * (x[1] - 1.0)]),
                jacobian,
            })
        }
        fn eval_hessian(
            &self,
            _x: &DVector<f64>,
            obj_factor: f64,
            _lambda: &DVector<f64>,
        ) -> OcpResult<SparseTriplets> {
            // the x column is stored as an explicit zero
            let mut h = SparseTriplets::new(2, 2);
            h.push(0, 0, 0.0);
            h.push(1, 1, 2.0 * obj_factor);
            Ok(h)
        }
    }

    #[test]
    fn equality_on_a_bound_still_has_an_interior() {
        let problem = EqualityOnBound { copies: 1 };
        let res = solve_nlp(&problem, InteriorPointOptions::default()).unwrap();
        assert_eq!(res.status, SolverStatus::Converged);
        assert!(res.x[0] >= 0.0);
        assert_relative_eq!(res.x[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(res.x[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn repeated_equality_rows_are_regularized() {
        for linear_solver in [LinearSolverKind::SparseLu, LinearSolverKind::DenseLu] {
            let opts = InteriorPointOptions {
                linear_solver,
                ..Default::default()
            };
            let res = solve_nlp(&EqualityOnBound { copies: 3 }, opts).unwrap();
            assert_eq!(res.status, SolverStatus::Converged, "{}", linear_solver);
            assert_relative_eq!(res.x[0], 0.0, epsilon = 1e-6);
            assert_relative_eq!(res.x[1], 1.0, epsilon = 1e-6);
        }
    }

    /// min a + b  s.t.  0.1 a + 0.7 b = 0.8,  0.3 a + 2.1 b + (a − 1)² + (b − 1)² = 2.9
    /// From (1, 1) the two gradients are parallel up to rounding while the second row
    /// is violated, so the first linearization has no solution. Solution (0.3, 1.1).
    struct TangentConstraints;

    impl NlpProblem for TangentConstraints {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            2
        }
        fn bounds(&self) -> NlpBounds {
            NlpBounds {
                x_lower: DVector::from_element(2, -NLP_INFINITY),
                x_upper: DVector::from_element(2, NLP_INFINITY),
                g_lower: DVector::from_vec(vec![0.8, 2.9]),
                g_upper: DVector::from_vec(vec![0.8, 2.9]),
            }
        }
        fn initial_point(&self) -> DVector<f64> {
            DVector::from_element(2, 1.0)
        }
        fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
            let g = DVector::from_vec(vec![
                0.1 * x[0] + 0.7 * x[1],
                0.3 * x[0] + 2.1 * x[1] + (x[0] - 1.0).powi(2) + (x[1] - 1.0).powi(2),
            ]);
            Ok((x[0] + x[1], g))
        }
        fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
            let (objective, constraints) = self.eval_values(x)?;
            let mut jacobian = SparseTriplets::new(2, 2);
            jacobian.push(0, 0, 0.1);
            jacobian.push(0, 1, 0.7);
            jacobian.push(1, 0, 0.3 + 2.0 * (x[0] - 1.0));
            jacobian.push(1, 1, 2.1 + 2.0 * (x[1] - 1.0));
            Ok(FirstOrder {
                objective,
                constraints,
                gradient: DVector::from_element(2, 1.0),
                jacobian,
            })
        }
        fn eval_hessian(
            &self,
            _x: &DVector<f64>,
            _obj_factor: f64,
            lambda: &DVector<f64>,
        ) -> OcpResult<SparseTriplets> {
            let mut h = SparseTriplets::new(2, 2);
            h.push(0, 0, 2.0 * lambda[1]);
            h.push(1, 1, 2.0 * lambda[1]);
            Ok(h)
        }
    }

    #[test]
    fn inconsistent_first_linearization_is_regularized() {
        for linear_solver in [LinearSolverKind::SparseLu, LinearSolverKind::DenseLu] {
            let opts = InteriorPointOptions {
                linear_solver,
                ..Default::default()
            };
            let res = solve_nlp(&TangentConstraints, opts).unwrap();
            assert_eq!(res.status, SolverStatus::Converged, "{}", linear_solver);
            assert_relative_eq!(res.x[0], 0.3, epsilon = 1e-6);
            assert_relative_eq!(res.x[1], 1.1, epsilon = 1e-6);
            assert_relative_eq!(res.objective, 1.4, epsilon = 1e-6);
        }
    }

    #[test]
    fn inverted_bounds_are_a_configuration_error() {
        struct Inverted;
        impl NlpProblem for Inverted {
            fn num_variables(&self) -> usize {
                1
            }
            fn num_constraints(&self) -> usize {
                0
            }
            fn bounds(&self) -> NlpBounds {
                NlpBounds {
                    x_lower: DVector::from_element(1, 1.0),
                    x_upper: DVector::from_element(1, 0.0),
                    g_lower: DVector::zeros(0),
                    g_upper: DVector::zeros(0),
                }
            }
            fn initial_point(&self) -> DVector<f64> {
                DVector::zeros(1)
            }
            fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
                Ok((x[0], DVector::zeros(0)))
            }
            fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
                Ok(FirstOrder {
                    objective: x[0],
                    constraints: DVector::zeros(0),
                    gradient: DVector::from_element(1, 1.0),
                    jacobian: SparseTriplets::new(0, 1),
                })
            }
            fn eval_hessian(
                &self,
                _x: &DVector<f64>,
                _s: f64,
                _l: &DVector<f64>,
            ) -> OcpResult<SparseTriplets> {
                Ok(SparseTriplets::new(1, 1))
            }
        }
        let err = solve_nlp(&Inverted, InteriorPointOptions::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn parse_hessian_option() {
        use std::str::FromStr;
        assert_eq!(
            HessianApproximation::from_str("limited-memory").unwrap(),
            HessianApproximation::LimitedMemory
        );
        assert_eq!(
            HessianApproximation::from_str("BFGS").unwrap(),
            HessianApproximation::LimitedMemory
        );
        assert_eq!(HessianApproximation::Exact.to_string(), "exact");
    }
}
