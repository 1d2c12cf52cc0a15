//! Factorization of the primal-dual (KKT) systems of the interior point solver.
//!
//! Two back ends: faer sparse LU for real problems and nalgebra dense LU for tiny
//! systems and debugging. A factorization is reported as failed when the decomposition
//! errors out or when a solve produces non-finite numbers, which is how a singular
//! KKT matrix shows up with LU. One step of iterative refinement is applied when the
//! residual of the first solve is not small.
//!
//! The sparse path always uses the supernodal factorization. The simplicial kernel
//! aborts on an exactly zero pivot, and rank deficient KKT matrices (redundant
//! equality rows, empty Hessian blocks) produce such pivots before the solver had a
//! chance to regularize.
use crate::somelinalg::sparse_triplets::SparseTriplets;
use faer::dyn_stack::{MemBuffer, MemStack};
use faer::mat::Mat;
use faer::sparse::linalg::SupernodalThreshold;
use faer::sparse::linalg::lu::{LuRef, LuSymbolicParams, NumericLu, factorize_symbolic_lu};
use faer::{Conj, Par};
use log::debug;
use nalgebra::DVector;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum LinearSolverKind {
    #[strum(to_string = "sparse-lu", serialize = "sparse_lu", serialize = "faer")]
    SparseLu,
    #[strum(to_string = "dense-lu", serialize = "dense_lu", serialize = "nalgebra")]
    DenseLu,
}

type SolveFn = Box<dyn Fn(&DVector<f64>) -> Option<DVector<f64>>>;

/// A factorized square system, ready for repeated solves.
pub struct KktFactorization {
    n: usize,
    matrix: SparseTriplets,
    solver: SolveFn,
}

impl KktFactorization {
    /// Factorize `matrix` (all nonzeros of a square matrix, duplicates allowed).
    pub fn factorize(matrix: &SparseTriplets, kind: LinearSolverKind) -> Option<Self> {
        let n = matrix.nrows;
        if n != matrix.ncols {
            return None;
        }
        let solver: SolveFn = match kind {
            LinearSolverKind::SparseLu => {
                let mat = matrix.without_zeros().to_faer()?;
                let params = LuSymbolicParams {
                    supernodal_flop_ratio_threshold: SupernodalThreshold::FORCE_SUPERNODAL,
                    ..Default::default()
                };
                let symbolic = match factorize_symbolic_lu(mat.symbolic(), params) {
                    Ok(symbolic) => symbolic,
                    Err(e) => {
                        debug!("sparse LU symbolic phase failed: {:?}", e);
                        return None;
                    }
                };
                let mut numeric = NumericLu::<usize, f64>::new();
                let mut buffer = MemBuffer::new(
                    symbolic.factorize_numeric_lu_scratch::<f64>(Par::Seq, Default::default()),
                );
                if let Err(e) = symbolic.factorize_numeric_lu(
                    &mut numeric,
                    mat.as_ref(),
                    Par::Seq,
                    MemStack::new(&mut buffer),
                    Default::default(),
                ) {
                    debug!("sparse LU failed: {:?}", e);
                    return None;
                }
                Box::new(move |rhs: &DVector<f64>| {
                    // SAFETY: `numeric` was produced by `symbolic.factorize_numeric_lu` above
                    // and neither is touched afterwards.
                    let lu = unsafe { LuRef::new_unchecked(&symbolic, &numeric) };
                    let mut x = Mat::from_fn(n, 1, |i, _| rhs[i]);
                    let mut buffer =
                        MemBuffer::new(symbolic.solve_in_place_scratch::<f64>(1, Par::Seq));
                    lu.solve_in_place_with_conj(
                        Conj::No,
                        x.as_mut(),
                        Par::Seq,
                        MemStack::new(&mut buffer),
                    );
                    let out = DVector::from_fn(n, |i, _| x[(i, 0)]);
                    if out.iter().all(|v| v.is_finite()) {
                        Some(out)
                    } else {
                        None
                    }
                })
            }
            LinearSolverKind::DenseLu => {
                let lu = matrix.to_dense().lu();
                if !lu.is_invertible() {
                    debug!("dense LU: matrix is singular");
                    return None;
                }
                Box::new(move |rhs: &DVector<f64>| {
                    let out = lu.solve(rhs)?;
                    if out.iter().all(|v| v.is_finite()) {
                        Some(out)
                    } else {
                        None
                    }
                })
            }
        };
        Some(KktFactorization {
            n,
            matrix: matrix.clone(),
            solver,
        })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve K x = rhs with one refinement step; None when the result is not finite.
    pub fn solve(&self, rhs: &DVector<f64>) -> Option<DVector<f64>> {
        let mut x = (self.solver)(rhs)?;
        let residual = rhs - self.matrix.mul_vec(&x);
        let scale = 1.0 + rhs.amax();
        if residual.amax() > 1e-10 * scale {
            if let Some(dx) = (self.solver)(&residual) {
                x += dx;
            }
        }
        Some(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    // saddle point system [[2, 0, 1], [0, 2, 1], [1, 1, 0]]
    fn saddle() -> SparseTriplets {
        let mut k = SparseTriplets::new(3, 3);
        k.push(0, 0, 2.0);
        k.push(1, 1, 2.0);
        k.push(2, 0, 1.0);
        k.push(0, 2, 1.0);
        k.push(2, 1, 1.0);
        k.push(1, 2, 1.0);
        k
    }

    #[test]
    fn sparse_and_dense_agree() {
        let rhs = DVector::from_vec(vec![1.0, -1.0, 2.0]);
        let xs = KktFactorization::factorize(&saddle(), LinearSolverKind::SparseLu)
            .unwrap()
            .solve(&rhs)
            .unwrap();
        let xd = KktFactorization::factorize(&saddle(), LinearSolverKind::DenseLu)
            .unwrap()
            .solve(&rhs)
            .unwrap();
        assert_relative_eq!(xs, xd, epsilon = 1e-12);
        assert_relative_eq!(saddle().mul_vec(&xs), rhs, epsilon = 1e-12);
    }

    #[test]
    fn singular_dense_matrix_is_rejected() {
        let mut k = SparseTriplets::new(2, 2);
        k.push(0, 0, 1.0);
        k.push(0, 1, 1.0);
        k.push(1, 0, 1.0);
        k.push(1, 1, 1.0);
        assert!(KktFactorization::factorize(&k, LinearSolverKind::DenseLu).is_none());
    }

    #[test]
    fn singular_sparse_matrix_is_rejected() {
        // elimination cancels the second pivot to an exact zero
        let mut k = SparseTriplets::new(2, 2);
        k.push(0, 0, 1.0);
        k.push(0, 1, 1.0);
        k.push(1, 0, 1.0);
        k.push(1, 1, 1.0);
        let rhs = DVector::from_vec(vec![1.0, 2.0]);
        let solved = KktFactorization::factorize(&k, LinearSolverKind::SparseLu)
            .and_then(|f| f.solve(&rhs));
        assert!(solved.is_none());
    }

    // [[W, Jᵀ], [J, -δc I]] with an explicitly stored zero W and a repeated
    // constraint row, the shape of a pure feasibility problem with redundant equalities
    fn rank_deficient_kkt(delta_w: f64, delta_c: f64) -> SparseTriplets {
        let mut k = SparseTriplets::new(4, 4);
        for i in 0..2 {
            k.push(i, i, delta_w);
            k.push(2 + i, 2 + i, -delta_c);
            for j in 0..2 {
                k.push(2 + i, j, 1.0);
                k.push(j, 2 + i, 1.0);
            }
        }
        k
    }

    #[test]
    fn rank_deficient_kkt_fails_without_regularization() {
        let rhs = DVector::from_vec(vec![0.0, 0.0, -1.0, -1.0]);
        for kind in [LinearSolverKind::SparseLu, LinearSolverKind::DenseLu] {
            let solved = KktFactorization::factorize(&rank_deficient_kkt(0.0, 0.0), kind)
                .and_then(|f| f.solve(&rhs));
            assert!(solved.is_none(), "{} accepted a singular matrix", kind);
        }
    }

    #[test]
    fn regularized_rank_deficient_kkt_is_solved() {
        let k = rank_deficient_kkt(1e-4, 1e-8);
        let rhs = DVector::from_vec(vec![0.0, 0.0, -1.0, -1.0]);
        let xs = KktFactorization::factorize(&k, LinearSolverKind::SparseLu)
            .unwrap()
            .solve(&rhs)
            .unwrap();
        let xd = KktFactorization::factorize(&k, LinearSolverKind::DenseLu)
            .unwrap()
            .solve(&rhs)
            .unwrap();
        assert_relative_eq!(xs, xd, epsilon = 1e-6, max_relative = 1e-8);
        // the primal step satisfies the consistent linearized constraints
        assert_relative_eq!(xs[0] + xs[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn parse_solver_kind() {
        assert_eq!(
            LinearSolverKind::from_str("Sparse-LU").unwrap(),
            LinearSolverKind::SparseLu
        );
        assert_eq!(LinearSolverKind::DenseLu.to_string(), "dense-lu");
    }
}
