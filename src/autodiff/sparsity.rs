//! Sparsity probing for callback blocks.
//!
//! A block family (all collocation nodes of a phase, one phase endpoint, the
//! linkage block) is probed once with first order AD at randomly perturbed points.
//! Inputs an output structurally depends on become the block's active set, whether
//! or not the derivative happens to vanish at the probe point; the per-output
//! dependencies become the Jacobian pattern. The pattern is cached by the
//! discrete NLP and every later evaluation seeds only the active inputs.
use crate::autodiff::ad_number::Ad;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// seed used for the probing perturbations, so patterns are reproducible
pub const PROBE_SEED: u64 = 0x5eed_0c70;

/// Active inputs of one block family and the nonzero pattern of each output.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPattern {
    pub ninputs: usize,
    /// local input indices that some output depends on, ascending
    pub active: Vec<usize>,
    /// for every output, positions into `active` with a structural nonzero
    pub output_nonzeros: Vec<Vec<usize>>,
}

impl BlockPattern {
    /// conservative pattern: everything depends on everything
    pub fn full(ninputs: usize, noutputs: usize) -> Self {
        BlockPattern {
            ninputs,
            active: (0..ninputs).collect(),
            output_nonzeros: vec![(0..ninputs).collect(); noutputs],
        }
    }

    pub fn noutputs(&self) -> usize {
        self.output_nonzeros.len()
    }

    /// number of Jacobian nonzeros contributed by one evaluation of the block
    pub fn nnz(&self) -> usize {
        self.output_nonzeros.iter().map(|o| o.len()).sum()
    }

    /// Probe `f` at the given points (first order AD, all inputs seeded).
    /// If any probe is non-finite the full pattern is returned.
    pub fn probe<F>(f: &F, points: &[Vec<f64>], noutputs: usize, label: &str) -> Self
    where
        F: Fn(&[Ad]) -> Vec<Ad>,
    {
        let ninputs = points.first().map(|p| p.len()).unwrap_or(0);
        let mut depends = vec![vec![false; ninputs]; noutputs];
        for point in points {
            let inputs: Vec<Ad> = point
                .iter()
                .enumerate()
                .map(|(i, &v)| Ad::variable(v, i, ninputs, false))
                .collect();
            let outputs = f(&inputs);
            if outputs.len() != noutputs || outputs.iter().any(|o| !o.is_finite()) {
                warn!(
                    "sparsity probe of {} was not finite, using the dense pattern",
                    label
                );
                return BlockPattern::full(ninputs, noutputs);
            }
            for (o, out) in outputs.iter().enumerate() {
                for (i, dep) in depends[o].iter_mut().enumerate() {
                    if out.depends_on(i) {
                        *dep = true;
                    }
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
        let pattern = BlockPattern {
            ninputs,
            active,
            output_nonzeros,
        };
        debug!(
            "{}: {} of {} inputs active, {} nonzeros per evaluation",
            label,
            pattern.active.len(),
            ninputs,
            pattern.nnz()
        );
        pattern
    }
}

/// Random perturbation of a probe point, relative to the magnitude of each entry.
pub struct ProbePerturbation {
    rng: StdRng,
}

impl ProbePerturbation {
    pub fn new() -> Self {
        ProbePerturbation {
            rng: StdRng::seed_from_u64(PROBE_SEED),
        }
    }

    pub fn perturb(&mut self, base: &[f64]) -> Vec<f64> {
        base.iter()
            .map(|&x| {
                let magnitude = x.abs().max(1.0);
                let delta: f64 = self.rng.random_range(0.5..1.5) * 1e-3 * magnitude;
                if self.rng.random_bool(0.5) {
                    x + delta
                } else {
                    x - delta
                }
            })
            .collect()
    }
}

impl Default for ProbePerturbation {
    fn default() -> Self {
        Self::new()
    }
}
