//! The nonlinear program seen by the interior point solver:
//!
//! min f(x)  s.t.  g_l <= g(x) <= g_u,  x_l <= x <= x_u
//!
//! Equality rows have g_l == g_u, fixed variables have x_l == x_u. Bounds with
//! magnitude >= [`NLP_INFINITY`] are treated as absent. Jacobians are delivered as
//! triplets, Hessians of the Lagrangian as the lower triangle.
use crate::numerical::OCP::ocp_errors::OcpResult;
use crate::somelinalg::sparse_triplets::SparseTriplets;
use nalgebra::DVector;

/// magnitude from which a bound is considered infinite
pub const NLP_INFINITY: f64 = 1e19;

pub fn is_finite_bound(b: f64) -> bool {
    b.is_finite() && b.abs() < NLP_INFINITY
}

#[derive(Debug, Clone, PartialEq)]
pub struct NlpBounds {
    pub x_lower: DVector<f64>,
    pub x_upper: DVector<f64>,
    pub g_lower: DVector<f64>,
    pub g_upper: DVector<f64>,
}

/// objective, constraints and their first derivatives at one point
#[derive(Debug, Clone)]
pub struct FirstOrder {
    pub objective: f64,
    pub constraints: DVector<f64>,
    pub gradient: DVector<f64>,
    pub jacobian: SparseTriplets,
}

pub trait NlpProblem {
    fn num_variables(&self) -> usize;
    fn num_constraints(&self) -> usize;
    fn bounds(&self) -> NlpBounds;
    fn initial_point(&self) -> DVector<f64>;
    /// objective value and constraint values
    fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)>;
    fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder>;
    /// lower triangle of obj_factor ∇²f + Σ λ_i ∇²g_i
    fn eval_hessian(
        &self,
        x: &DVector<f64>,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> OcpResult<SparseTriplets>;
}

/// Max violation of the constraint and variable bounds at `x` given g(x).
pub fn bound_violation(bounds: &NlpBounds, x: &DVector<f64>, g: &DVector<f64>) -> f64 {
    let mut v: f64 = 0.0;
    for i in 0..g.len() {
        v = v.max(bounds.g_lower[i] - g[i]).max(g[i] - bounds.g_upper[i]);
    }
    for i in 0..x.len() {
        v = v.max(bounds.x_lower[i] - x[i]).max(x[i] - bounds.x_upper[i]);
    }
    v.max(0.0)
}

#[cfg(test)]
pub(crate) mod test_problems {
    //! Small NLPs with known solutions, shared by the solver tests.
    use super::*;

    /// min (x0 - 1)^2 + (x1 - 2)^2  s.t.  x0 + x1 = 1
    /// solution (0, 1), multiplier 2 (with ∇f + Jᵀλ = 0: λ = 2)
    pub struct EqualityQp;

    impl NlpProblem for EqualityQp {
        fn num_variables(&self) -> usize {
            2
        }
        fn num_constraints(&self) -> usize {
            1
        }
        fn bounds(&self) -> NlpBounds {
            NlpBounds {
                x_lower: DVector::from_element(2, -NLP_INFINITY),
                x_upper: DVector::from_element(2, NLP_INFINITY),
                g_lower: DVector::from_element(1, 1.0),
                g_upper: DVector::from_element(1, 1.0),
            }
        }
        fn initial_point(&self) -> DVector<f64> {
            DVector::from_vec(vec![3.0, -2.0])
        }
        fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
            let f = (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2);
            Ok((f, DVector::from_element(1, x[0] + x[1])))
        }
        fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
            let (objective, constraints) = self.eval_values(x)?;
            let mut jacobian = SparseTriplets::new(1, 2);
            jacobian.push(0, 0, 1.0);
            jacobian.push(0, 1, 1.0);
            Ok(FirstOrder {
                objective,
                constraints,
                gradient: DVector::from_vec(vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)]),
                jacobian,
            })
        }
        fn eval_hessian(
            &self,
            _x: &DVector<f64>,
            obj_factor: f64,
            _lambda: &DVector<f64>,
        ) -> OcpResult<SparseTriplets> {
            let mut h = SparseTriplets::new(2, 2);
            h.push(0, 0, 2.0 * obj_factor);
            h.push(1, 1, 2.0 * obj_factor);
            Ok(h)
        }
    }

    /// Hock–Schittkowski 71:
    /// min x0 x3 (x0 + x1 + x2) + x2
    /// s.t. x0 x1 x2 x3 >= 25, Σ x_i² = 40, 1 <= x <= 5
    /// f* = 17.0140173
    pub struct Hs071;

    impl NlpProblem for Hs071 {
        fn num_variables(&self) -> usize {
            4
        }
        fn num_constraints(&self) -> usize {
            2
        }
        fn bounds(&self) -> NlpBounds {
            NlpBounds {
                x_lower: DVector::from_element(4, 1.0),
                x_upper: DVector::from_element(4, 5.0),
                g_lower: DVector::from_vec(vec![25.0, 40.0]),
                g_upper: DVector::from_vec(vec![2e19, 40.0]),
            }
        }
        fn initial_point(&self) -> DVector<f64> {
            DVector::from_vec(vec![1.0, 5.0, 5.0, 1.0])
        }
        fn eval_values(&self, x: &DVector<f64>) -> OcpResult<(f64, DVector<f64>)> {
            let f = x[0] * x[3] * (x[0] + x[1] + x[2]) + x[2];
            let g = DVector::from_vec(vec![
                x[0] * x[1] * x[2] * x[3],
                x.iter().map(|v| v * v).sum(),
            ]);
            Ok((f, g))
        }
        fn eval_first_order(&self, x: &DVector<f64>) -> OcpResult<FirstOrder> {
            let (objective, constraints) = self.eval_values(x)?;
            let gradient = DVector::from_vec(vec![
                x[0] * x[3] + x[3] * (x[0] + x[1] + x[2]),
                x[0] * x[3],
                x[0] * x[3] + 1.0,
                x[0] * (x[0] + x[1] + x[2]),
            ]);
            let mut jacobian = SparseTriplets::new(2, 4);
            jacobian.push(0, 0, x[1] * x[2] * x[3]);
            jacobian.push(0, 1, x[0] * x[2] * x[3]);
            jacobian.push(0, 2, x[0] * x[1] * x[3]);
            jacobian.push(0, 3, x[0] * x[1] * x[2]);
            for j in 0..4 {
                jacobian.push(1, j, 2.0 * x[j]);
            }
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
            s: f64,
            l: &DVector<f64>,
        ) -> OcpResult<SparseTriplets> {
            let mut h = SparseTriplets::new(4, 4);
            h.push(0, 0, s * 2.0 * x[3] + l[1] * 2.0);
            h.push(1, 0, s * x[3] + l[0] * x[2] * x[3]);
            h.push(1, 1, l[1] * 2.0);
            h.push(2, 0, s * x[3] + l[0] * x[1] * x[3]);
            h.push(2, 1, l[0] * x[0] * x[3]);
            h.push(2, 2, l[1] * 2.0);
            h.push(3, 0, s * (2.0 * x[0] + x[1] + x[2]) + l[0] * x[1] * x[2]);
            h.push(3, 1, s * x[0] + l[0] * x[0] * x[2]);
            h.push(3, 2, s * x[0] + l[0] * x[0] * x[1]);
            h.push(3, 3, l[1] * 2.0);
            Ok(h)
        }
    }
}
