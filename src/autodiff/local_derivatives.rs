//! Derivatives of one callback block on its local inputs.
//!
//! The engine never differentiates with respect to the whole NLP vector. Every
//! callback evaluation (one collocation node, one phase endpoint, the linkage block)
//! sees a short local input vector, and only the inputs found active by the
//! sparsity probe are seeded. The result is a dense but tiny gradient/Hessian per
//! output which the transcription scatters into the global sparse matrices.
use crate::autodiff::ad_number::{Ad, packed_index, packed_len};
use crate::numerical::OCP::ocp_errors::{OcpError, OcpResult};
use strum_macros::{Display, EnumString};

/// How derivatives of the user callbacks are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum DerivativeMethod {
    #[strum(to_string = "automatic", serialize = "ad")]
    Automatic,
    #[strum(to_string = "finite-difference", serialize = "finite_difference", serialize = "numerical")]
    FiniteDifference,
    /// user supplied dynamics Jacobian where available, automatic elsewhere
    #[strum(to_string = "analytic-if-supplied", serialize = "analytic")]
    AnalyticIfSupplied,
}

/// What the caller needs from a local evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DerivativeOrder {
    Values,
    First,
    Second,
}

/// Values and local derivatives of all outputs of one callback block.
/// Gradients and Hessians are indexed by position in the active input list.
#[derive(Debug, Clone)]
pub struct LocalEvaluation {
    pub values: Vec<f64>,
    pub gradients: Vec<Vec<f64>>,
    /// packed lower triangles, one per output
    pub hessians: Option<Vec<Vec<f64>>>,
}

impl LocalEvaluation {
    pub fn noutputs(&self) -> usize {
        self.values.len()
    }

    /// Σ_o weights[o] · ∇²out_o  (packed); None when no Hessians were computed
    pub fn weighted_hessian(&self, weights: &[f64]) -> Option<Vec<f64>> {
        let hessians = self.hessians.as_ref()?;
        let len = hessians.first().map(|h| h.len()).unwrap_or(0);
        let mut acc = vec![0.0; len];
        for (h, &w) in hessians.iter().zip(weights.iter()) {
            if w == 0.0 {
                continue;
            }
            for (a, v) in acc.iter_mut().zip(h.iter()) {
                *a += w * v;
            }
        }
        Some(acc)
    }
}

/// step for central first differences
fn fd_step_first(x: f64) -> f64 {
    f64::EPSILON.cbrt() * x.abs().max(1.0)
}

/// step for central second differences
fn fd_step_second(x: f64) -> f64 {
    f64::EPSILON.powf(0.25) * x.abs().max(1.0)
}

fn check_finite(label: &str, values: &[f64]) -> OcpResult<()> {
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(OcpError::numerical(format!(
            "{} returned a non-finite value at output {}",
            label, pos
        )));
    }
    Ok(())
}

/// evaluate with every input held constant
fn eval_plain<F>(f: &F, point: &[f64]) -> Vec<f64>
where
    F: Fn(&[Ad]) -> Vec<Ad>,
{
    let inputs: Vec<Ad> = point.iter().map(|&v| Ad::constant(v)).collect();
    f(&inputs).iter().map(|o| o.value()).collect()
}

/// Evaluate `f` at `point`, differentiating with respect to the inputs listed in
/// `active` (local input indices). `label` names the block in error messages.
pub fn evaluate_local<F>(
    f: &F,
    point: &[f64],
    active: &[usize],
    method: DerivativeMethod,
    order: DerivativeOrder,
    label: &str,
) -> OcpResult<LocalEvaluation>
where
    F: Fn(&[Ad]) -> Vec<Ad>,
{
    match method {
        DerivativeMethod::FiniteDifference if order > DerivativeOrder::Values => {
            finite_difference(f, point, active, order, label)
        }
        _ => automatic(f, point, active, order, label),
    }
}

fn automatic<F>(
    f: &F,
    point: &[f64],
    active: &[usize],
    order: DerivativeOrder,
    label: &str,
) -> OcpResult<LocalEvaluation>
where
    F: Fn(&[Ad]) -> Vec<Ad>,
{
    let k = if order == DerivativeOrder::Values {
        0
    } else {
        active.len()
    };
    let second = order == DerivativeOrder::Second;
    let mut inputs: Vec<Ad> = point.iter().map(|&v| Ad::constant(v)).collect();
    if k > 0 {
        for (pos, &idx) in active.iter().enumerate() {
            inputs[idx] = Ad::variable(point[idx], pos, k, second);
        }
    }
    let outputs = f(&inputs);
    let values: Vec<f64> = outputs.iter().map(|o| o.value()).collect();
    check_finite(label, &values)?;
    if let Some(pos) = outputs.iter().position(|o| !o.is_finite()) {
        return Err(OcpError::numerical(format!(
            "{} produced non-finite derivatives at output {}",
            label, pos
        )));
    }
    let gradients: Vec<Vec<f64>> = outputs
        .iter()
        .map(|o| (0..k).map(|j| o.derivative(j)).collect())
        .collect();
    let hessians = if second {
        Some(
            outputs
                .iter()
                .map(|o| {
                    let mut h = vec![0.0; packed_len(k)];
                    for i in 0..k {
                        for j in 0..=i {
                            h[packed_index(i, j)] = o.second_derivative(i, j);
                        }
                    }
                    h
                })
                .collect(),
        )
    } else {
        None
    };
    Ok(LocalEvaluation {
        values,
        gradients,
        hessians,
    })
}

fn finite_difference<F>(
    f: &F,
    point: &[f64],
    active: &[usize],
    order: DerivativeOrder,
    label: &str,
) -> OcpResult<LocalEvaluation>
where
    F: Fn(&[Ad]) -> Vec<Ad>,
{
    let values = eval_plain(f, point);
    check_finite(label, &values)?;
    let m = values.len();
    let k = active.len();
    let mut gradients = vec![vec![0.0; k]; m];
    let mut work = point.to_vec();
    for (pos, &idx) in active.iter().enumerate() {
        let h = fd_step_first(point[idx]);
        work[idx] = point[idx] + h;
        let fp = eval_plain(f, &work);
        work[idx] = point[idx] - h;
        let fm = eval_plain(f, &work);
        work[idx] = point[idx];
        check_finite(label, &fp)?;
        check_finite(label, &fm)?;
        for o in 0..m {
            gradients[o][pos] = (fp[o] - fm[o]) / (2.0 * h);
        }
    }
    let hessians = if order == DerivativeOrder::Second {
        let mut hess = vec![vec![0.0; packed_len(k)]; m];
        for a in 0..k {
            let ia = active[a];
            let ha = fd_step_second(point[ia]);
            for b in 0..=a {
                let ib = active[b];
                let hb = fd_step_second(point[ib]);
                let mut corner = |sa: f64, sb: f64| -> OcpResult<Vec<f64>> {
                    work[ia] += sa * ha;
                    work[ib] += sb * hb;
                    let r = eval_plain(f, &work);
                    work[ia] = point[ia];
                    work[ib] = point[ib];
                    check_finite(label, &r)?;
                    Ok(r)
                };
                let fpp = corner(1.0, 1.0)?;
                let fpm = corner(1.0, -1.0)?;
                let fmp = corner(-1.0, 1.0)?;
                let fmm = corner(-1.0, -1.0)?;
                for o in 0..m {
                    hess[o][packed_index(a, b)] =
                        (fpp[o] - fpm[o] - fmp[o] + fmm[o]) / (4.0 * ha * hb);
                }
            }
        }
        Some(hess)
    } else {
        None
    };
    Ok(LocalEvaluation {
        values,
        gradients,
        hessians,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f0 = x0^2 * x1, f1 = sin(x1) + x2
    fn block(x: &[Ad]) -> Vec<Ad> {
        vec![x[0].powi(2) * &x[1], x[1].sin() + &x[2]]
    }

    #[test]
    fn automatic_matches_analytic_on_active_subset() {
        let point = [1.5, 0.3, -2.0];
        let active = [0, 1];
        let ev = evaluate_local(
            &block,
            &point,
            &active,
            DerivativeMethod::Automatic,
            DerivativeOrder::Second,
            "test block",
        )
        .unwrap();
        assert_relative_eq!(ev.values[0], 1.5 * 1.5 * 0.3, epsilon = 1e-14);
        assert_relative_eq!(ev.gradients[0][0], 2.0 * 1.5 * 0.3, epsilon = 1e-14);
        assert_relative_eq!(ev.gradients[0][1], 1.5 * 1.5, epsilon = 1e-14);
        // x2 is not seeded, so f1 only sees x1
        assert_eq!(ev.gradients[1].len(), 2);
        assert_relative_eq!(ev.gradients[1][1], 0.3_f64.cos(), epsilon = 1e-14);
        let h = ev.hessians.as_ref().unwrap();
        assert_relative_eq!(h[0][packed_index(0, 0)], 2.0 * 0.3, epsilon = 1e-14);
        assert_relative_eq!(h[0][packed_index(1, 0)], 2.0 * 1.5, epsilon = 1e-14);
        assert_relative_eq!(h[1][packed_index(1, 1)], -(0.3_f64.sin()), epsilon = 1e-14);
    }

    #[test]
    fn finite_difference_is_close_to_automatic() {
        let point = [0.7, 1.1, 0.2];
        let active = [0, 1, 2];
        let ad = evaluate_local(
            &block,
            &point,
            &active,
            DerivativeMethod::Automatic,
            DerivativeOrder::Second,
            "ad",
        )
        .unwrap();
        let fd = evaluate_local(
            &block,
            &point,
            &active,
            DerivativeMethod::FiniteDifference,
            DerivativeOrder::Second,
            "fd",
        )
        .unwrap();
        for o in 0..2 {
            for j in 0..3 {
                assert_relative_eq!(ad.gradients[o][j], fd.gradients[o][j], epsilon = 1e-8);
            }
            let (ha, hf) = (&ad.hessians.as_ref().unwrap()[o], &fd.hessians.as_ref().unwrap()[o]);
            for (a, b) in ha.iter().zip(hf.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn non_finite_output_is_a_numerical_failure() {
        let bad = |x: &[Ad]| vec![(&x[0] - 2.0).sqrt()];
        let err = evaluate_local(
            &bad,
            &[1.0],
            &[0],
            DerivativeMethod::Automatic,
            DerivativeOrder::First,
            "sqrt block",
        )
        .unwrap_err();
        assert!(matches!(err, OcpError::NumericalFailure(_)));
    }

    #[test]
    fn weighted_hessian_sums_outputs() {
        let ev = evaluate_local(
            &block,
            &[1.0, 0.5, 0.0],
            &[0, 1],
            DerivativeMethod::Automatic,
            DerivativeOrder::Second,
            "w",
        )
        .unwrap();
        let w = ev.weighted_hessian(&[2.0, 1.0]).unwrap();
        let h = ev.hessians.as_ref().unwrap();
        for i in 0..w.len() {
            assert_relative_eq!(w[i], 2.0 * h[0][i] + h[1][i], epsilon = 1e-14);
        }
    }

    #[test]
    fn parse_derivative_method() {
        use std::str::FromStr;
        assert_eq!(
            DerivativeMethod::from_str("automatic").unwrap(),
            DerivativeMethod::Automatic
        );
        assert_eq!(
            DerivativeMethod::from_str("Finite-Difference").unwrap(),
            DerivativeMethod::FiniteDifference
        );
        assert_eq!(DerivativeMethod::Automatic.to_string(), "automatic");
    }
}
