use thiserror::Error;

/// Errors surfaced by the sparse eigenvector solvers.
///
/// Running out of iterations is not an error: results carry a `converged`
/// flag instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpEigenError {
    /// Rejected before any computation was attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A decomposition failed or an iterate stopped being finite.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
}

pub type Result<T> = std::result::Result<T, SpEigenError>;

impl SpEigenError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SpEigenError::InvalidInput(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        SpEigenError::NumericalFailure(msg.into())
    }
}
