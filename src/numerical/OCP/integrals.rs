//! Quadrature of node outputs: the Lagrange cost and the auxiliary integrals.
//!
//! Node outputs already carry the factor (tf − t0)/2, so the integral of an
//! output over the phase is the plain weighted sum Σ_k w_k out_k. An auxiliary
//! integral is an extra unknown `Q_q` tied by the equality row
//! `Q_q − Σ_k w_k G_q,k = 0`.
use crate::numerical::OCP::collocation::Collocation;

/// Positions of the quadrature terms among the node outputs of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadratureTerms {
    pub cost_output: usize,
    pub nintegrals: usize,
}

impl QuadratureTerms {
    pub fn new(cost_output: usize, nintegrals: usize) -> Self {
        QuadratureTerms {
            cost_output,
            nintegrals,
        }
    }

    pub fn integrand_output(&self, q: usize) -> usize {
        self.cost_output + 1 + q
    }

    /// Σ_k w_k L_k
    pub fn cost<O: AsRef<[f64]>>(&self, coll: &Collocation, outputs: &[O]) -> f64 {
        weighted_sum(coll, outputs, self.cost_output)
    }

    /// Σ_k w_k G_q,k for every auxiliary integrand
    pub fn integrals<O: AsRef<[f64]>>(&self, coll: &Collocation, outputs: &[O]) -> Vec<f64> {
        (0..self.nintegrals)
            .map(|q| weighted_sum(coll, outputs, self.integrand_output(q)))
            .collect()
    }

    /// residuals Q_q − Σ_k w_k G_q,k
    pub fn residuals<O: AsRef<[f64]>>(
        &self,
        coll: &Collocation,
        outputs: &[O],
        q_values: &[f64],
    ) -> Vec<f64> {
        self.integrals(coll, outputs)
            .iter()
            .zip(q_values.iter())
            .map(|(sum, q)| q - sum)
            .collect()
    }

    /// Second order weights of node k's quadrature outputs in the Lagrangian:
    /// `sigma · w_k` for the cost, `−λ_q w_k` for integrand q.
    pub fn hessian_weights(
        &self,
        coll: &Collocation,
        k: usize,
        sigma: f64,
        integral_multipliers: &[f64],
        weights: &mut [f64],
    ) {
        let w = coll.weights[k];
        weights[self.cost_output] = sigma * w;
        for q in 0..self.nintegrals {
            weights[self.integrand_output(q)] = -integral_multipliers[q] * w;
        }
    }
}

fn weighted_sum<O: AsRef<[f64]>>(coll: &Collocation, outputs: &[O], output: usize) -> f64 {
    coll.weights
        .iter()
        .zip(outputs.iter())
        .map(|(w, out)| w * out.as_ref()[output])
        .sum()
}
