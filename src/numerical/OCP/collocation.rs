//! Collocation schemes on the normalized interval τ ∈ [−1, 1].
//!
//! Both schemes are written as a pair of sparse operators acting on the nodal
//! values: the defect of row r and state i is
//! ```text
//!     Σ_j A_rj x_ij − Σ_j B_rj h_ij = 0,   h = (tf − t0)/2 · f
//! ```
//! - Legendre: LGL nodes, A = LGL differentiation matrix, B = identity (N rows)
//! - trapezoidal: equally spaced nodes, A = forward difference, B = Δτ/2 [1 1] (N−1 rows)
//!
//! so a single assembly path in the transcription serves both.
use crate::numerical::OCP::algorithm::CollocationMethod;
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use log::warn;
use nalgebra::DMatrix;
use std::f64::consts::PI;

/// Legendre-Gauss-Lobatto nodes (ascending) and quadrature weights for `n` points.
pub fn lgl_nodes(n: usize) -> (Vec<f64>, Vec<f64>) {
    let deg = n - 1;
    // Chebyshev-Gauss-Lobatto start
    let mut x: Vec<f64> = (0..n).map(|j| (PI * j as f64 / deg as f64).cos()).collect();
    let mut p = DMatrix::<f64>::zeros(n, n);
    let mut converged = false;
    for _ in 0..100 {
        let xold = x.clone();
        for i in 0..n {
            p[(i, 0)] = 1.0;
            p[(i, 1)] = x[i];
            for k in 2..=deg {
                let kf = k as f64;
                p[(i, k)] =
                    ((2.0 * kf - 1.0) * x[i] * p[(i, k - 1)] - (kf - 1.0) * p[(i, k - 2)]) / kf;
            }
        }
        let mut change: f64 = 0.0;
        for i in 0..n {
            x[i] = xold[i] - (xold[i] * p[(i, deg)] - p[(i, deg - 1)]) / (n as f64 * p[(i, deg)]);
            change = change.max((x[i] - xold[i]).abs());
        }
        if change <= 4.0 * f64::EPSILON {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!("LGL node iteration for {} points stopped without full convergence", n);
    }
    // Legendre values at the final nodes for the weights
    let mut w = vec![0.0; n];
    for i in 0..n {
        let (mut pm, mut pc) = (1.0, x[i]);
        for k in 2..=deg {
            let kf = k as f64;
            let pn = ((2.0 * kf - 1.0) * x[i] * pc - (kf - 1.0) * pm) / kf;
            pm = pc;
            pc = pn;
        }
        w[i] = 2.0 / (deg as f64 * n as f64 * pc * pc);
    }
    x.reverse();
    w.reverse();
    (x, w)
}

/// Legendre polynomial P_deg at x
fn legendre(deg: usize, x: f64) -> f64 {
    if deg == 0 {
        return 1.0;
    }
    let (mut pm, mut pc) = (1.0, x);
    for k in 2..=deg {
        let kf = k as f64;
        let pn = ((2.0 * kf - 1.0) * x * pc - (kf - 1.0) * pm) / kf;
        pm = pc;
        pc = pn;
    }
    pc
}

/// LGL differentiation matrix on the nodes `tau` (ascending)
pub fn lgl_differentiation_matrix(tau: &[f64]) -> DMatrix<f64> {
    let n = tau.len();
    let deg = n - 1;
    let l: Vec<f64> = tau.iter().map(|&t| legendre(deg, t)).collect();
    let mut d = DMatrix::<f64>::zeros(n, n);
    for k in 0..n {
        for j in 0..n {
            if k != j {
                d[(k, j)] = l[k] / (l[j] * (tau[k] - tau[j]));
            }
        }
    }
    let corner = (deg * n) as f64 / 4.0;
    d[(0, 0)] = -corner;
    d[(n - 1, n - 1)] = corner;
    d
}

#[derive(Debug, Clone)]
pub struct Collocation {
    pub method: CollocationMethod,
    pub nnodes: usize,
    pub tau: Vec<f64>,
    pub weights: Vec<f64>,
    /// per defect row: (node, A coefficient)
    pub a_by_row: Vec<Vec<(usize, f64)>>,
    /// per defect row: (node, B coefficient)
    pub b_by_row: Vec<Vec<(usize, f64)>>,
    /// per node: (defect row, B coefficient)
    pub b_by_node: Vec<Vec<(usize, f64)>>,
    barycentric: Vec<f64>,
}

impl Collocation {
    pub fn new(method: CollocationMethod, nnodes: usize) -> OcpResult<Self> {
        if nnodes < 2 {
            return Err(OcpError::config(format!(
                "collocation needs at least 2 nodes, got {}",
                nnodes
            )));
        }
        let (tau, weights, a_by_row, b_by_row) = match method {
            CollocationMethod::Legendre => {
                let (tau, weights) = lgl_nodes(nnodes);
                let d = lgl_differentiation_matrix(&tau);
                let a_by_row: Vec<Vec<(usize, f64)>> = (0..nnodes)
                    .map(|k| {
                        (0..nnodes)
                            .filter(|&j| d[(k, j)] != 0.0)
                            .map(|j| (j, d[(k, j)]))
                            .collect()
                    })
                    .collect();
                let b_by_row: Vec<Vec<(usize, f64)>> =
                    (0..nnodes).map(|k| vec![(k, 1.0)]).collect();
                (tau, weights, a_by_row, b_by_row)
            }
            CollocationMethod::Trapezoidal => {
                let delta = 2.0 / (nnodes - 1) as f64;
                let tau: Vec<f64> = (0..nnodes)
                    .map(|k| if k == nnodes - 1 { 1.0 } else { -1.0 + k as f64 * delta })
                    .collect();
                let mut weights = vec![delta; nnodes];
                weights[0] = 0.5 * delta;
                weights[nnodes - 1] = 0.5 * delta;
                let a_by_row = (0..nnodes - 1)
                    .map(|k| vec![(k, -1.0), (k + 1, 1.0)])
                    .collect();
                let b_by_row = (0..nnodes - 1)
                    .map(|k| {
                        let half_step = 0.5 * (tau[k + 1] - tau[k]);
                        vec![(k, half_step), (k + 1, half_step)]
                    })
                    .collect();
                (tau, weights, a_by_row, b_by_row)
            }
        };
        let mut b_by_node: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nnodes];
        for (r, row) in b_by_row.iter().enumerate() {
            for &(k, b) in row {
                b_by_node[k].push((r, b));
            }
        }
        let barycentric = match method {
            CollocationMethod::Legendre => {
                let raw: Vec<f64> = (0..nnodes)
                    .map(|j| {
                        let prod: f64 = (0..nnodes)
                            .filter(|&m| m != j)
                            .map(|m| tau[j] - tau[m])
                            .product();
                        1.0 / prod
                    })
                    .collect();
                let max = raw.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
                raw.iter().map(|v| v / max).collect()
            }
            CollocationMethod::Trapezoidal => Vec::new(),
        };
        Ok(Collocation {
            method,
            nnodes,
            tau,
            weights,
            a_by_row,
            b_by_row,
            b_by_node,
            barycentric,
        })
    }

    pub fn ndefect_rows(&self) -> usize {
        self.a_by_row.len()
    }

    /// physical time of node k
    pub fn node_time(&self, t0: f64, tf: f64, k: usize) -> f64 {
        let tau = self.tau[k];
        0.5 * t0 * (1.0 - tau) + 0.5 * tf * (1.0 + tau)
    }

    pub fn node_times(&self, t0: f64, tf: f64) -> Vec<f64> {
        (0..self.nnodes).map(|k| self.node_time(t0, tf, k)).collect()
    }

    /// Interpolate nodal values at τ: barycentric Lagrange form for Legendre,
    /// piecewise linear for trapezoidal.
    pub fn interpolate(&self, values: &[f64], tau: f64) -> f64 {
        match self.method {
            CollocationMethod::Legendre => {
                let (mut num, mut den) = (0.0, 0.0);
                for j in 0..self.nnodes {
                    let diff = tau - self.tau[j];
                    if diff == 0.0 {
                        return values[j];
                    }
                    let c = self.barycentric[j] / diff;
                    num += c * values[j];
                    den += c;
                }
                num / den
            }
            CollocationMethod::Trapezoidal => {
                let n = self.nnodes;
                let tau = tau.clamp(-1.0, 1.0);
                let k = self.tau.partition_point(|&t| t <= tau).clamp(1, n - 1) - 1;
                let s = (tau - self.tau[k]) / (self.tau[k + 1] - self.tau[k]);
                values[k] + s * (values[k + 1] - values[k])
            }
        }
    }

    /// Σ w_k v_k over the nodes
    pub fn quadrature(&self, values: &[f64]) -> f64 {
        self.weights.iter().zip(values.iter()).map(|(w, v)| w * v).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lgl_five_points() {
        let (x, w) = lgl_nodes(5);
        let a = (3.0_f64 / 7.0).sqrt();
        let expected = [-1.0, -a, 0.0, a, 1.0];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert_relative_eq!(xi, ei, epsilon = 1e-14);
        }
        let we = [0.1, 49.0 / 90.0, 32.0 / 45.0, 49.0 / 90.0, 0.1];
        for (wi, ei) in w.iter().zip(we.iter()) {
            assert_relative_eq!(wi, ei, epsilon = 1e-14);
        }
    }

    #[test]
    fn lgl_quadrature_is_exact_for_high_degree() {
        // N points integrate degree 2N-3 exactly
        let c = Collocation::new(CollocationMethod::Legendre, 12).unwrap();
        let values: Vec<f64> = c.tau.iter().map(|t| t.powi(20) + t.powi(3)).collect();
        assert_relative_eq!(c.quadrature(&values), 2.0 / 21.0, epsilon = 1e-13);
        assert_relative_eq!(c.weights.iter().sum::<f64>(), 2.0, epsilon = 1e-13);
    }

    #[test]
    fn differentiation_matrix_is_exact_on_polynomials() {
        let tau = lgl_nodes(8).0;
        let d = lgl_differentiation_matrix(&tau);
        for k in 0..8 {
            let mut dp = 0.0;
            for j in 0..8 {
                dp += d[(k, j)] * (tau[j].powi(7) - 2.0 * tau[j]);
            }
            assert_relative_eq!(dp, 7.0 * tau[k].powi(6) - 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn operators_have_the_expected_row_counts() {
        let lgl = Collocation::new(CollocationMethod::Legendre, 6).unwrap();
        assert_eq!(lgl.ndefect_rows(), 6);
        assert_eq!(lgl.b_by_node[3], vec![(3, 1.0)]);
        let trap = Collocation::new(CollocationMethod::Trapezoidal, 6).unwrap();
        assert_eq!(trap.ndefect_rows(), 5);
        assert_eq!(trap.b_by_node[0].len(), 1);
        assert_eq!(trap.b_by_node[2].len(), 2);
        assert_relative_eq!(trap.weights.iter().sum::<f64>(), 2.0, epsilon = 1e-14);
        assert!(Collocation::new(CollocationMethod::Legendre, 1).is_err());
    }

    #[test]
    fn trapezoidal_defect_vanishes_for_linear_motion() {
        // x = 3 t on t in [0, 2], f = 3
        let c = Collocation::new(CollocationMethod::Trapezoidal, 5).unwrap();
        let (t0, tf) = (0.0, 2.0);
        let half = 0.5 * (tf - t0);
        let x: Vec<f64> = c.node_times(t0, tf).iter().map(|t| 3.0 * t).collect();
        for r in 0..c.ndefect_rows() {
            let ax: f64 = c.a_by_row[r].iter().map(|&(k, a)| a * x[k]).sum();
            let bh: f64 = c.b_by_row[r].iter().map(|&(_, b)| b * half * 3.0).sum();
            assert_relative_eq!(ax - bh, 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn interpolation_reproduces_polynomials_and_lines() {
        let c = Collocation::new(CollocationMethod::Legendre, 7).unwrap();
        let v: Vec<f64> = c.tau.iter().map(|t| t.powi(5) - t).collect();
        assert_relative_eq!(c.interpolate(&v, 0.3), 0.3_f64.powi(5) - 0.3, epsilon = 1e-13);
        assert_relative_eq!(c.interpolate(&v, c.tau[2]), v[2], epsilon = 1e-15);
        let t = Collocation::new(CollocationMethod::Trapezoidal, 3).unwrap();
        assert_relative_eq!(t.interpolate(&[0.0, 1.0, 4.0], 0.5), 2.5, epsilon = 1e-15);
        assert_relative_eq!(t.interpolate(&[0.0, 1.0, 4.0], 1.0), 4.0, epsilon = 1e-15);
    }
}
