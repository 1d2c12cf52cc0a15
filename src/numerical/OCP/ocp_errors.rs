//! Error taxonomy of the optimal control engine.
//!
//! Configuration problems are detected before any solve attempt and returned as
//! `Err`. Numerical failures abort the running attempt. Non-convergence
//! (infeasibility, iteration cap) is not an error at all: it is reported through the
//! solver status and the solution's error flag.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcpError {
    /// Malformed bounds, dimension mismatch, missing level-2 setup, bad options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-finite values or derivatives coming out of the user callbacks, or a
    /// linear algebra breakdown the solver cannot recover from.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
}

impl OcpError {
    pub fn config(message: impl Into<String>) -> Self {
        OcpError::Configuration(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        OcpError::NumericalFailure(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, OcpError::Configuration(_))
    }
}

pub type OcpResult<T> = Result<T, OcpError>;
