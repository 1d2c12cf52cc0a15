//! Scaling of the discrete NLP.
//!
//! Variables are mapped affinely, `raw = shift + scale · scaled`, constraint rows
//! and the objective are multiplied by positive factors. With bounds `[l, u]` the
//! automatic map puts the variable into `[−1, 1]`. [`ScaledNlp`] wraps any
//! [`NlpProblem`] and presents the scaled problem to the solver; the solution is
//! brought back with [`ScaledNlp::unscale_point`] and
//! [`ScaledNlp::unscale_multipliers`].
use crate::numerical::OCP::algorithm::ScalingMode;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use crate::numerical::OCP::problem::{Problem, is_bounded};
use crate::numerical::OCP::transcription::DiscreteNlp;
use crate::numerical::optimization::nlp_problem::{FirstOrder, NlpBounds, NlpProblem};
use crate::somelinalg::sparse_triplets::SparseTriplets;
use log::{debug, info, warn};
use nalgebra::DVector;

/// target magnitude of the scaled objective gradient
const OBJECTIVE_GRADIENT_TARGET: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    pub scale: f64,
    pub shift: f64,
}

impl AffineMap {
    pub fn unit() -> Self {
        AffineMap {
            scale: 1.0,
            shift: 0.0,
        }
    }

    /// Map `[lower, upper]` onto `[−1, 1]`. Unbounded or degenerate ranges get the
    /// unit map, inverted ranges are an error.
    pub fn from_bounds(lower: f64, upper: f64) -> OcpResult<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(OcpError::config(format!(
                "cannot scale inverted bounds [{}, {}]",
                lower, upper
            )));
        }
        if !is_bounded(lower) || !is_bounded(upper) || lower == upper {
            return Ok(AffineMap::unit());
        }
        Ok(AffineMap {
            scale: 0.5 * (upper - lower),
            shift: 0.5 * (upper + lower),
        })
    }

    pub fn to_scaled(&self, raw: f64) -> f64 {
        (raw - self.shift) / self.scale
    }

    pub fn to_raw(&self, scaled: f64) -> f64 {
        self.shift + self.scale * scaled
    }

    /// bounds keep their "unbounded" meaning
    fn bound_to_scaled(&self, raw: f64) -> f64 {
        if is_bounded(raw) { self.to_scaled(raw) } else { raw }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingFactors {
    pub variables: Vec<AffineMap>,
    /// positive row factors, `scaled row = row / factor`
    pub constraints: Vec<f64>,
    /// positive objective multiplier
    pub objective: f64,
}

impl ScalingFactors {
    pub fn identity(nvars: usize, ncons: usize) -> Self {
        ScalingFactors {
            variables: vec![AffineMap::unit(); nvars],
            constraints: vec![1.0; ncons],
            objective: 1.0,
        }
    }

    /// Variables from their bounds; ranged rows by their half width, equality and
    /// one-sided rows unit.
    pub fn from_bounds(bounds: &NlpBounds) -> OcpResult<Self> {
        let variables = (0..bounds.x_lower.len())
            .map(|i| AffineMap::from_bounds(bounds.x_lower[i], bounds.x_upper[i]))
            .collect::<OcpResult<Vec<_>>>()?;
        let constraints = (0..bounds.g_lower.len())
            .map(|r| AffineMap::from_bounds(bounds.g_lower[r], bounds.g_upper[r]).map(|m| m.scale))
            .collect::<OcpResult<Vec<_>>>()?;
        Ok(ScalingFactors {
            variables,
            constraints,
            objective: 1.0,
        })
    }

    /// User factors of every phase (shift 0).
    pub fn manual(problem: &Problem, nlp: &DiscreteNlp) -> OcpResult<Self> {
        let mut factors = ScalingFactors::identity(nlp.nvars, nlp.ncons);
        for block in &nlp.phases {
            let Some(user) = &problem.phase(block.index)?.scaling else {
                continue;
            };
            let lay = &block.layout;
            let d = lay.dims;
            let factor = |v: &Vec<f64>, i: usize| v.get(i).copied().unwrap_or(1.0);
            let mut set = |local: usize, s: f64| {
                factors.variables[lay.global(local)] = AffineMap {
                    scale: s,
                    shift: 0.0,
                };
            };
            for k in 0..lay.nnodes {
                for i in 0..d.nstates {
                    set(lay.state(k, i), factor(&user.states, i));
                }
                for j in 0..d.ncontrols {
                    set(lay.control(k, j), factor(&user.controls, j));
                }
            }
            for p in 0..d.nparameters {
                set(lay.parameter(p), factor(&user.parameters, p));
            }
            let time = if user.time > 0.0 { user.time } else { 1.0 };
            set(lay.t0(), time);
            set(lay.tf(), time);
            for k in 0..lay.nnodes {
                for j in 0..d.npath {
                    factors.constraints[block.path_row(k, j)] = factor(&user.path, j);
                }
            }
            for e in 0..d.nevents {
                factors.constraints[block.event_row(e)] = factor(&user.events, e);
            }
        }
        factors.objective = problem.objective_scaling;
        Ok(factors)
    }

    /// Objective factor from the gradient at `x`: min(1, 100 / ‖∇f · scale‖∞).
    pub fn set_objective_from_gradient<P: NlpProblem + ?Sized>(
        &mut self,
        problem: &P,
        x: &DVector<f64>,
    ) -> OcpResult<()> {
        let fo = match problem.eval_first_order(x) {
            Ok(fo) => fo,
            Err(e) => {
                warn!("objective scaling skipped: {}", e);
                self.objective = 1.0;
                return Ok(());
            }
        };
        let norm = fo
            .gradient
            .iter()
            .zip(self.variables.iter())
            .fold(0.0_f64, |m, (g, map)| m.max((g * map.scale).abs()));
        self.objective = if norm > OBJECTIVE_GRADIENT_TARGET {
            OBJECTIVE_GRADIENT_TARGET / norm
        } else {
            1.0
        };
        debug!("objective scaling factor {:e}", self.objective);
        Ok(())
    }

    /// Factors of one stage for the chosen mode.
    pub fn for_stage(mode: ScalingMode, problem: &Problem, nlp: &DiscreteNlp) -> OcpResult<Self> {
        let factors = match mode {
            ScalingMode::None => ScalingFactors::identity(nlp.nvars, nlp.ncons),
            ScalingMode::Manual => ScalingFactors::manual(problem, nlp)?,
            ScalingMode::Automatic => {
                let mut f = ScalingFactors::from_bounds(&nlp.bounds())?;
                f.set_objective_from_gradient(nlp, &nlp.initial_point())?;
                f.objective *= problem.objective_scaling;
                f
            }
        };
        info!("scaling: {}, objective factor {:e}", mode, factors.objective);
        Ok(factors)
    }
}

/// The scaled view of an NLP.
pub struct ScaledNlp<'a, P: NlpProblem + ?Sized> {
    inner: &'a P,
    pub factors: ScalingFactors,
}

impl<'a, P: NlpProblem + ?Sized> ScaledNlp<'a, P> {
    pub fn new(inner: &'a P, factors: ScalingFactors) -> OcpResult<Self> {
        if factors.variables.len() != inner.num_variables()
            || factors.constraints.len() != inner.num_constraints()
        {
            return Err(OcpError::config("scaling factors do not match the NLP size"));
        }
        let bad_variable = factors
            .variables
            .iter()
            .any(|m| !(m.scale.is_finite() && m.scale > 0.0));
        let bad_row = factors.constraints.iter().any(|s| !(s.is_finite() && *s > 0.0));
        if bad_variable || bad_row || !(factors.objective.is_finite() && factors.objective > 0.0) {
            return Err(OcpError::config("scaling factors must be positive and finite"));
        }
        Ok(ScaledNlp { inner, factors })
    }

    pub fn scale_point(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(x.len(), |i, _| self.factors.variables[i].to_scaled(x[i]))
    }

    pub fn unscale_point(&self, xs: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(xs.len(), |i, _| self.factors.variables[i].to_raw(xs[i]))
    }

    /// constraint multipliers of the raw problem (raw objective units)
    pub fn unscale_multipliers(&self, lambda: &DVector<f64>) -> DVector<f64> {
        let sigma = self.factors.objective;
        DVector::from_fn(lambda.len(), |r, _| {
            lambda[r] / (sigma * self.factors.constraints[r])
        })
    }

    /// bound multipliers of the raw problem
    pub fn unscale_bound_multipliers(&self, z: &DVector<f64>) -> DVector<f64> {
        let sigma = self.factors.objective;
        DVector::from_fn(z.len(), |i, _| {
            z[i] / (sigma * self.factors.variables[i].scale)
        })
    }

    fn scale_rows(&self, g: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(g.len(), |r, _| g[r] / self.factors.constraints[r])
    }
}

impl<'a, P: NlpProblem + ?Sized> NlpProblem for ScaledNlp<'a, P> {
    fn num_variables(&self) -> usize {
        self.inner.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.inner.num_constraints()
    }

    fn bounds(&self) -> NlpBounds {
        let raw = self.inner.bounds();
        let maps = &self.factors.variables;
        let rows = &self.factors.constraints;
        let row_bound = |b: f64, s: f64| if is_bounded(b) { b / s } else { b };
        NlpBounds {
            x_lower: DVector::from_fn(raw.x_lower.len(), |i, _| {
                maps[i].bound_to_scaled(raw.x_lower[i])
            }),
            x_upper: DVector::from_fn(raw.x_upper.len(), |i, _| {
                maps[i].bound_to_scaled(raw.x_upper[i])
            }),
            g_lower: DVector::from_fn(raw.g_lower.len(), |r, _| row_bound(raw.g_lower[r], rows[r])),
            g_upper: DVector::from_fn(raw.g_upper.len(), |r, _| row_bound(raw.g_upper[r], rows[r])),
        }
    }

    fn initial_point(&self) -> DVector<f64> {
        self.scale_point(&self.inner.initial_point())
    }

    fn eval_values(&self, xs: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
        let (f, g) = self.inner.eval_values(&self.unscale_point(xs))?;
        Ok((self.factors.objective * f, self.scale_rows(&g)))
    }

    fn eval_first_order(&self, xs: &DVector<f64>) -> OcpResult<FirstOrder> {
        let fo = self.inner.eval_first_order(&self.unscale_point(xs))?;
        let sigma = self.factors.objective;
        let maps = &self.factors.variables;
        let gradient = DVector::from_fn(fo.gradient.len(), |i, _| {
            sigma * fo.gradient[i] * maps[i].scale
        });
        let mut jacobian = SparseTriplets::with_capacity(
            fo.jacobian.nrows,
            fo.jacobian.ncols,
            fo.jacobian.nnz(),
        );
        for &(r, c, v) in &fo.jacobian.entries {
            jacobian.push(r, c, v * maps[c].scale / self.factors.constraints[r]);
        }
        Ok(FirstOrder {
            objective: sigma * fo.objective,
            constraints: self.scale_rows(&fo.constraints),
            gradient,
            jacobian,
        })
    }

    fn eval_hessian(
        &self,
        xs: &DVector<f64>,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> OcpResult<SparseTriplets> {
        let raw_lambda = self.scale_rows(lambda);
        let h = self.inner.eval_hessian(
            &self.unscale_point(xs),
            obj_factor * self.factors.objective,
            &raw_lambda,
        )?;
        let maps = &self.factors.variables;
        let mut scaled = SparseTriplets::with_capacity(h.nrows, h.ncols, h.nnz());
        for &(a, b, v) in &h.entries {
            scaled.push(a, b, v * maps[a].scale * maps[b].scale);
        }
        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::OCP::problem::INF;
    use crate::numerical::optimization::interior_point::{InteriorPointOptions, solve_nlp};
    use crate::numerical::optimization::nlp_problem::test_problems::{EqualityQp, Hs071};
    use approx::assert_relative_eq;

    #[test]
    fn bounded_variables_land_in_the_unit_envelope() {
        let map = AffineMap::from_bounds(2.0, 6.0).unwrap();
        assert_eq!(map, AffineMap { scale: 2.0, shift: 4.0 });
        for raw in [2.0, 3.3, 6.0] {
            let s = map.to_scaled(raw);
            assert!((-1.0..=1.0).contains(&s));
            assert_relative_eq!(map.to_raw(s), raw, epsilon = 1e-14);
        }
    }

    #[test]
    fn degenerate_and_unbounded_ranges_get_the_unit_map() {
        assert_eq!(AffineMap::from_bounds(1.0, 1.0).unwrap(), AffineMap::unit());
        assert_eq!(AffineMap::from_bounds(-INF, 3.0).unwrap(), AffineMap::unit());
        assert_eq!(
            AffineMap::from_bounds(f64::NEG_INFINITY, f64::INFINITY).unwrap(),
            AffineMap::unit()
        );
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = AffineMap::from_bounds(3.0, 1.0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn scaled_problem_has_the_same_solution() {
        let problem = Hs071;
        let mut factors = ScalingFactors::from_bounds(&problem.bounds()).unwrap();
        factors.set_objective_from_gradient(&problem, &problem.initial_point()).unwrap();
        factors.constraints[0] = 25.0;
        let scaled = ScaledNlp::new(&problem, factors).unwrap();
        let result = solve_nlp(&scaled, InteriorPointOptions::default()).unwrap();
        assert!(result.status.is_success());
        let x = scaled.unscale_point(&result.x);
        let (f, _) = problem.eval_values(&x).unwrap();
        assert_relative_eq!(f, 17.0140173, epsilon = 1e-5);
    }

    #[test]
    fn multipliers_come_back_in_raw_units() {
        let problem = EqualityQp;
        let factors = ScalingFactors {
            variables: vec![
                AffineMap { scale: 2.0, shift: 1.0 },
                AffineMap { scale: 0.5, shift: 0.0 },
            ],
            constraints: vec![4.0],
            objective: 0.1,
        };
        let scaled = ScaledNlp::new(&problem, factors).unwrap();
        let result = solve_nlp(&scaled, InteriorPointOptions::default()).unwrap();
        assert!(result.status.is_success());
        let x = scaled.unscale_point(&result.x);
        assert_relative_eq!(x[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-6);
        let lambda = scaled.unscale_multipliers(&result.lambda);
        assert_relative_eq!(lambda[0], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn scaled_derivatives_follow_the_chain_rule() {
        let problem = EqualityQp;
        let factors = ScalingFactors {
            variables: vec![
                AffineMap { scale: 3.0, shift: -1.0 },
                AffineMap { scale: 0.25, shift: 2.0 },
            ],
            constraints: vec![2.0],
            objective: 0.5,
        };
        let scaled = ScaledNlp::new(&problem, factors).unwrap();
        let xs = DVector::from_vec(vec![0.3, -0.7]);
        let fo = scaled.eval_first_order(&xs).unwrap();
        let h = 1e-6;
        for j in 0..2 {
            let mut xp = xs.clone();
            xp[j] += h;
            let mut xm = xs.clone();
            xm[j] -= h;
            let (fp, gp) = scaled.eval_values(&xp).unwrap();
            let (fm, gm) = scaled.eval_values(&xm).unwrap();
            assert_relative_eq!(fo.gradient[j], (fp - fm) / (2.0 * h), epsilon = 1e-6);
            assert_relative_eq!(
                fo.jacobian.to_dense()[(0, j)],
                (gp[0] - gm[0]) / (2.0 * h),
                epsilon = 1e-6
            );
        }
        let hess = scaled
            .eval_hessian(&xs, 1.0, &DVector::from_element(1, 1.0))
            .unwrap()
            .to_dense_symmetric();
        assert_relative_eq!(hess[(0, 0)], 0.5 * 2.0 * 9.0, epsilon = 1e-12);
        assert_relative_eq!(hess[(1, 1)], 0.5 * 2.0 * 0.0625, epsilon = 1e-12);
        assert!(ScaledNlp::new(
            &problem,
            ScalingFactors {
                objective: 0.0,
                ..ScalingFactors::identity(2, 1)
            }
        )
        .is_err());
    }
}
