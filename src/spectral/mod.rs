//! Hermitian input `S` (or data `X`) reduced to sorted eigenpairs.

use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::ArrayView2;

use crate::error::{Result, SpEigenError};
use crate::utils::{
    all_finite, column_peak_energy, hermitian_defect, hermitian_part, to_dmatrix, FieldOps,
};

/// Allowed `|s_ij − conj(s_ji)|`, relative to the largest entry.
const HERMITIAN_TOL: f64 = 1e-10;
/// Allowed negative eigenvalue mass, relative to the largest eigenvalue.
const PSD_TOL: f64 = 1e-8;
/// Eigenvalues below `RANK_TOL * λ_max` count as numerically zero.
const RANK_TOL: f64 = 1e-10;
const EIGEN_MAX_ITER_PER_DIM: usize = 200;

/// Eigen-structure of a Hermitian positive semidefinite matrix.
#[derive(Debug, Clone)]
pub struct Spectrum<T: FieldOps> {
    covariance: DMatrix<T>,
    values: DVector<f64>,
    vectors: DMatrix<T>,
}

impl<T: FieldOps> Spectrum<T> {
    /// Builds the spectrum from `x`, read as an `n × m` data matrix when
    /// `data` is set and as an `m × m` covariance matrix otherwise.
    pub fn from_input(x: ArrayView2<'_, T>, data: bool) -> Result<Self> {
        if data {
            Self::from_data(x)
        } else {
            Self::from_covariance(&to_dmatrix(x))
        }
    }

    /// Uses the sample second-moment matrix `S = XᴴX / (n − 1)`.
    ///
    /// `S` is formed with the same ndarray product and division a caller
    /// would use, so fitting `X` and fitting that `S` see identical input.
    pub fn from_data(x: ArrayView2<'_, T>) -> Result<Self> {
        let n = x.nrows();
        if n < 2 {
            return Err(SpEigenError::invalid(format!(
                "data matrix needs at least 2 rows, got {}",
                n
            )));
        }
        if x.ncols() == 0 {
            return Err(SpEigenError::invalid("data matrix has no columns"));
        }
        if !x.iter().all(|v| v.is_finite()) {
            return Err(SpEigenError::invalid("data matrix contains non-finite entries"));
        }

        let adjoint = x.t().mapv(|v| v.conjugate());
        let s = adjoint.dot(&x) / T::from_real((n - 1) as f64);
        Self::from_covariance(&to_dmatrix(s.view()))
    }

    pub fn from_covariance(s: &DMatrix<T>) -> Result<Self> {
        let (rows, cols) = s.shape();
        if rows != cols {
            return Err(SpEigenError::invalid(format!(
                "covariance matrix must be square, got {} x {}",
                rows, cols
            )));
        }
        if rows == 0 {
            return Err(SpEigenError::invalid("covariance matrix is empty"));
        }
        if !all_finite(s) {
            return Err(SpEigenError::invalid(
                "covariance matrix contains non-finite entries",
            ));
        }

        let magnitude = s.iter().map(|x| x.modulus()).fold(1.0, f64::max);
        let defect = hermitian_defect(s);
        if defect > HERMITIAN_TOL * magnitude {
            return Err(SpEigenError::invalid(format!(
                "covariance matrix is not Hermitian (max deviation {:.3e})",
                defect
            )));
        }

        let covariance = hermitian_part(s);
        let (mut values, vectors) = eigh_descending(covariance.clone())?;

        let m = values.len();
        let largest = values.iter().map(|v| v.abs()).fold(0.0, f64::max);
        if values[m - 1] < -PSD_TOL * largest {
            return Err(SpEigenError::invalid(format!(
                "covariance matrix is not positive semidefinite (smallest eigenvalue {:.3e})",
                values[m - 1]
            )));
        }
        values.apply(|v| *v = v.max(0.0));

        debug!(
            "Spectrum of {} {} x {} matrix: lambda_max = {:.6e}, lambda_min = {:.6e}",
            T::field_name(),
            m,
            m,
            values[0],
            values[m - 1]
        );

        Ok(Spectrum {
            covariance,
            values,
            vectors,
        })
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn covariance(&self) -> &DMatrix<T> {
        &self.covariance
    }

    /// Eigenvalues in descending order, clamped at zero.
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn vectors(&self) -> &DMatrix<T> {
        &self.vectors
    }

    pub fn lambda_max(&self) -> f64 {
        self.values[0]
    }

    pub fn numerical_rank(&self) -> usize {
        let lambda_max = self.lambda_max();
        if lambda_max <= 0.0 {
            return 0;
        }
        self.values
            .iter()
            .take_while(|&&v| v > RANK_TOL * lambda_max)
            .count()
    }

    /// Fails unless `1 <= q <= rank(S)`.
    pub fn require_rank(&self, q: usize) -> Result<()> {
        if q == 0 {
            return Err(SpEigenError::invalid("number of components must be positive"));
        }
        if q > self.dim() {
            return Err(SpEigenError::invalid(format!(
                "number of components ({}) exceeds the dimension ({})",
                q,
                self.dim()
            )));
        }
        let rank = self.numerical_rank();
        if q > rank {
            return Err(SpEigenError::invalid(format!(
                "number of components ({}) exceeds the numerical rank of S ({}); lambda_q = {:.3e}",
                q,
                rank,
                self.values[q - 1]
            )));
        }
        Ok(())
    }

    /// The first `q` eigenvectors as an `m × q` matrix.
    pub fn leading_vectors(&self, q: usize) -> DMatrix<T> {
        self.vectors.columns(0, q).into_owned()
    }

    /// Sparsity scale for the weighted variance objective.
    ///
    /// `ρ_max,i = d_i λ_i max_j |v_ji|²` is the largest variance a single
    /// coordinate contributes to direction `i`.
    pub fn rho_max_weighted(&self, weights: &[f64]) -> Vec<f64> {
        let q = weights.len();
        let peaks = column_peak_energy(&self.leading_vectors(q));
        weights
            .iter()
            .zip(peaks)
            .enumerate()
            .map(|(i, (&d, peak))| d * self.values[i] * peak)
            .collect()
    }

    /// Sparsity scale for the likelihood objective.
    ///
    /// The log-likelihood gained by keeping coordinate `j` in direction `i`
    /// rather than leaving it to the noise floor is `|v_ji|² (λ_i / λ̄ − 1)`,
    /// where `λ̄` is the mean trailing eigenvalue.
    pub fn rho_max_likelihood(&self, q: usize) -> Vec<f64> {
        let floor = self.noise_floor(q);
        let peaks = column_peak_energy(&self.leading_vectors(q));
        peaks
            .into_iter()
            .enumerate()
            .map(|(i, peak)| peak * (self.values[i] / floor - 1.0).max(0.0))
            .collect()
    }

    /// Mean of `λ_{q+1..m}` (or `λ_m` when `q = m`), kept strictly positive.
    pub fn noise_floor(&self, q: usize) -> f64 {
        let m = self.dim();
        let tail = if q < m {
            self.values.rows(q, m - q).mean()
        } else {
            self.values[m - 1]
        };
        tail.max(RANK_TOL * self.lambda_max()).max(f64::MIN_POSITIVE)
    }
}

/// Hermitian eigendecomposition with eigenpairs sorted by decreasing eigenvalue.
pub(crate) fn eigh_descending<T: FieldOps>(s: DMatrix<T>) -> Result<(DVector<f64>, DMatrix<T>)> {
    let m = s.nrows();
    let eig = SymmetricEigen::try_new(s, f64::EPSILON, EIGEN_MAX_ITER_PER_DIM * m.max(1))
        .ok_or_else(|| SpEigenError::numerical("Hermitian eigendecomposition did not converge"))?;

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let values = DVector::from_iterator(m, order.iter().map(|&k| eig.eigenvalues[k]));
    let vectors = DMatrix::from_fn(m, m, |i, j| eig.eigenvectors[(i, order[j])]);

    if !values.iter().all(|v| v.is_finite()) || !all_finite(&vectors) {
        return Err(SpEigenError::numerical(
            "Hermitian eigendecomposition produced non-finite values",
        ));
    }
    Ok((values, vectors))
}
