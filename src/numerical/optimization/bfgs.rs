//! Damped BFGS approximation of the Hessian of the Lagrangian (Powell damping), used
//! when exact second derivatives are switched off. The approximation stays positive
//! definite, so the interior point step never needs curvature regularization on its
//! account.
use crate::somelinalg::sparse_triplets::SparseTriplets;
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone)]
pub struct DampedBfgs {
    pub b: DMatrix<f64>,
    pub updates: usize,
    pub skipped: usize,
}

impl DampedBfgs {
    pub fn new(n: usize) -> Self {
        DampedBfgs {
            b: DMatrix::identity(n, n),
            updates: 0,
            skipped: 0,
        }
    }

    /// s = step, y = change of the Lagrangian gradient along the step
    pub fn update(&mut self, s: &DVector<f64>, y: &DVector<f64>) {
        let bs = &self.b * s;
        let sbs = s.dot(&bs);
        if sbs <= f64::EPSILON * s.norm_squared().max(f64::MIN_POSITIVE) {
            self.skipped += 1;
            return;
        }
        let sy = s.dot(y);
        // Powell damping keeps s'r >= 0.2 s'Bs
        let theta = if sy >= 0.2 * sbs {
            1.0
        } else {
            0.8 * sbs / (sbs - sy)
        };
        let r = theta * y + (1.0 - theta) * &bs;
        let sr = s.dot(&r);
        if sr <= 0.0 || !sr.is_finite() {
            self.skipped += 1;
            return;
        }
        // first update: Shanno–Phua rescaling of the identity
        if self.updates == 0 {
            let gamma = r.norm_squared() / sr;
            if gamma.is_finite() && gamma > 0.0 {
                self.b *= gamma;
            }
        }
        let bs = &self.b * s;
        let sbs = s.dot(&bs);
        self.b -= &bs * bs.transpose() / sbs;
        self.b += &r * r.transpose() / sr;
        self.updates += 1;
    }

    /// lower triangle as triplets
    pub fn to_lower_triplets(&self) -> SparseTriplets {
        let n = self.b.nrows();
        let mut t = SparseTriplets::with_capacity(n, n, n * (n + 1) / 2);
        for j in 0..n {
            for i in j..n {
                let v = self.b[(i, j)];
                if v != 0.0 || i == j {
                    t.push(i, j, v);
                }
            }
        }
        t
    }
}
