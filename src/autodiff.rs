//! Automatic differentiation engine.
//!
//! - [`ad_number`]: the differentiable scalar [`Ad`] every user callback computes with
//! - [`local_derivatives`]: value/gradient/Hessian of one callback block on its local inputs
//! - [`sparsity`]: one-shot probing of which local inputs each block really depends on
pub mod ad_number;
pub mod local_derivatives;
pub mod sparsity;

#[cfg(test)]
mod ad_tests;

pub use ad_number::Ad;
pub use local_derivatives::{DerivativeMethod, DerivativeOrder, LocalEvaluation, evaluate_local};
pub use sparsity::{BlockPattern, ProbePerturbation};
