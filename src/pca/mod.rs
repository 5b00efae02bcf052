use nalgebra::DMatrix;
use ndarray::ArrayView2;

use crate::error::{Result, SpEigenError};
use crate::svd::procrustes_max;
use crate::utils::{gram_defect, to_dmatrix, FieldOps};

pub mod covariance;
pub mod sparse;

pub use covariance::{sp_eigen_cov, SpEigenCov, SpEigenCovBuilder, SpEigenCovResult};
pub use sparse::{sp_eigen, SpEigen, SpEigenBuilder, SpEigenResult};

/// Allowed `‖U₀ᴴU₀ − I‖_F` for a user-supplied starting basis.
const INITIAL_ORTHONORMAL_TOL: f64 = 1e-6;

/// Relative sparsity level, multiplied by each component's `ρ_max`.
#[derive(Debug, Clone, PartialEq)]
pub enum Sparsity {
    Uniform(f64),
    PerComponent(Vec<f64>),
}

impl Sparsity {
    /// One non-negative factor per component.
    pub(crate) fn resolve(&self, q: usize) -> Result<Vec<f64>> {
        let rho = match self {
            Sparsity::Uniform(r) => vec![*r; q],
            Sparsity::PerComponent(v) => {
                if v.len() != q {
                    return Err(SpEigenError::invalid(format!(
                        "expected {} sparsity values, got {}",
                        q,
                        v.len()
                    )));
                }
                v.clone()
            }
        };
        if let Some(bad) = rho.iter().find(|r| !(r.is_finite() && **r >= 0.0)) {
            return Err(SpEigenError::invalid(format!(
                "sparsity values must be finite and non-negative, got {}",
                bad
            )));
        }
        Ok(rho)
    }
}

impl Default for Sparsity {
    fn default() -> Self {
        Sparsity::Uniform(0.5)
    }
}

impl From<f64> for Sparsity {
    fn from(rho: f64) -> Self {
        Sparsity::Uniform(rho)
    }
}

impl From<Vec<f64>> for Sparsity {
    fn from(rho: Vec<f64>) -> Self {
        Sparsity::PerComponent(rho)
    }
}

/// Checks a user-supplied starting basis and snaps it onto the manifold.
pub(crate) fn initial_basis<T: FieldOps>(
    u0: ArrayView2<'_, T>,
    rows: usize,
    cols: usize,
) -> Result<DMatrix<T>> {
    if u0.dim() != (rows, cols) {
        return Err(SpEigenError::invalid(format!(
            "initial vectors must be {} x {}, got {} x {}",
            rows,
            cols,
            u0.nrows(),
            u0.ncols()
        )));
    }
    let u0 = to_dmatrix(u0);
    if !u0.iter().all(|x| x.is_finite()) {
        return Err(SpEigenError::invalid("initial vectors contain non-finite entries"));
    }
    let defect = gram_defect(&u0);
    if defect > INITIAL_ORTHONORMAL_TOL {
        return Err(SpEigenError::invalid(format!(
            "initial vectors are not orthonormal (defect {:.3e})",
            defect
        )));
    }
    procrustes_max(&u0)
}
