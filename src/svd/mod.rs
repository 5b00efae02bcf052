use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SpEigenError};
use crate::utils::{all_finite, FieldOps};

const SVD_MAX_ITER_PER_DIM: usize = 200;

pub struct SVD<T: FieldOps> {
    u: Option<DMatrix<T>>,
    s: Option<DVector<f64>>,
    vt: Option<DMatrix<T>>,
}

impl<T: FieldOps> SVD<T> {
    pub fn new() -> Self {
        SVD {
            u: None,
            s: None,
            vt: None,
        }
    }

    /// Thin decomposition of `x`: `u` is `m × k`, `vt` is `k × n`,
    /// `k = min(m, n)`.
    pub fn compute(&mut self, x: &DMatrix<T>) -> Result<()> {
        if !all_finite(x) {
            return Err(SpEigenError::numerical("SVD input contains non-finite entries"));
        }
        let max_niter = SVD_MAX_ITER_PER_DIM * x.nrows().max(x.ncols()).max(1);
        let svd = nalgebra::SVD::try_new(x.clone(), true, true, f64::EPSILON, max_niter)
            .ok_or_else(|| SpEigenError::numerical("SVD did not converge"))?;

        let u = svd
            .u
            .ok_or_else(|| SpEigenError::numerical("SVD returned no left singular vectors"))?;
        let vt = svd
            .v_t
            .ok_or_else(|| SpEigenError::numerical("SVD returned no right singular vectors"))?;
        if !all_finite(&u) || !all_finite(&vt) {
            return Err(SpEigenError::numerical("SVD produced non-finite singular vectors"));
        }

        self.u = Some(u);
        self.s = Some(svd.singular_values);
        self.vt = Some(vt);

        Ok(())
    }

    pub fn u(&self) -> Option<&DMatrix<T>> {
        self.u.as_ref()
    }

    pub fn s(&self) -> Option<&DVector<f64>> {
        self.s.as_ref()
    }

    pub fn vt(&self) -> Option<&DMatrix<T>> {
        self.vt.as_ref()
    }

    /// Unitary polar factor `U Vᴴ`.
    pub fn polar(&self) -> Option<DMatrix<T>> {
        match (self.u(), self.vt()) {
            (Some(u), Some(vt)) => Some(u * vt),
            _ => None,
        }
    }

    /// Number of singular values at or below `tol * σ_max`.
    pub fn negligible_values(&self, tol: f64) -> usize {
        match self.s() {
            Some(s) => {
                let cutoff = tol * s.max();
                s.iter().filter(|&&v| v <= cutoff).count()
            }
            None => 0,
        }
    }
}

impl<T: FieldOps> Default for SVD<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `argmax_{UᴴU = I} Re Tr(UᴴM)` for an `m × q` matrix `M` with `q <= m`.
///
/// The maximizer is the polar factor `V_L V_Rᴴ` of `M = V_L Σ V_Rᴴ`. It is
/// unique only when `M` has full column rank; otherwise any completion of the
/// null directions is optimal and the one returned is the SVD's.
pub fn procrustes_max<T: FieldOps>(m: &DMatrix<T>) -> Result<DMatrix<T>> {
    if m.ncols() > m.nrows() {
        return Err(SpEigenError::invalid(format!(
            "Procrustes target must be tall, got {} x {}",
            m.nrows(),
            m.ncols()
        )));
    }
    let mut svd = SVD::new();
    svd.compute(m)?;
    let degenerate = svd.negligible_values(f64::EPSILON * m.nrows().max(1) as f64);
    if degenerate > 0 {
        trace!(
            "Procrustes target {} x {} has {} negligible singular values, polar factor is not unique",
            m.nrows(),
            m.ncols(),
            degenerate
        );
    }
    svd.polar()
        .ok_or_else(|| SpEigenError::numerical("SVD factors missing after decomposition"))
}

/// `argmin_{UᴴU = I} Re Tr(UᴴM)`, the negated polar factor.
pub fn procrustes_min<T: FieldOps>(m: &DMatrix<T>) -> Result<DMatrix<T>> {
    Ok(-procrustes_max(m)?)
}
