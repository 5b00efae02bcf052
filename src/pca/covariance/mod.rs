//! Fits a covariance model `R = U Ξ Uᴴ` by minimizing the penalized negative
//! log-likelihood
//!
//! ```text
//! Σᵢ ln ξᵢ + Tr(S U Ξ⁻¹ Uᴴ) + Σⱼ₌₁..q ρⱼ Σᵢ g(|u_ij|)
//! ```
//!
//! over unitary `U` and ordered `ξ₁ ≥ … ≥ ξ_q ≥ ξ_{q+1} = … = ξ_m > 0`.
//! Each MM step first updates `U` from the previous `Ξ` (a Procrustes solve),
//! then `Ξ` from the new `U` (the ordered eigenvalue solve).

use log::info;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2};

use crate::accel::{step_length, IterationContext, MajorizationStep, Sense};
use crate::continuation::{ContinuationScheduler, SmoothingSchedule};
use crate::convergence::LevelReport;
use crate::error::{Result, SpEigenError};
use crate::ordered::{project_ordered, solve_ordered_eigenvalues};
use crate::pca::{initial_basis, Sparsity};
use crate::spectral::Spectrum;
use crate::surrogate::{penalty_total, sparsity_majorizer};
use crate::svd::{procrustes_max, procrustes_min};
use crate::utils::{
    all_finite, hermitian_part, rayleigh_quotients, relative_change, to_array1, to_array2,
    to_dmatrix, FieldOps,
};

pub struct SpEigenCovBuilder<T: FieldOps> {
    n_components: usize,
    rho: Sparsity,
    data: bool,
    initial_vectors: Option<Array2<T>>,
    initial_values: Option<Vec<f64>>,
    schedule: SmoothingSchedule,
    accelerated: bool,
    tolerance: f64,
    max_iter: usize,
}

impl<T: FieldOps> SpEigenCovBuilder<T> {
    pub fn new() -> Self {
        SpEigenCovBuilder {
            n_components: 1,
            rho: Sparsity::default(),
            data: false,
            initial_vectors: None,
            initial_values: None,
            schedule: SmoothingSchedule::default(),
            accelerated: true,
            tolerance: 1e-8,
            max_iter: 1000,
        }
    }

    /// Number of sparse leading eigenvectors `q`.
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn rho(mut self, rho: impl Into<Sparsity>) -> Self {
        self.rho = rho.into();
        self
    }

    pub fn data(mut self, data: bool) -> Self {
        self.data = data;
        self
    }

    /// Full `m × m` unitary starting basis.
    pub fn initial_vectors(mut self, u0: Array2<T>) -> Self {
        self.initial_vectors = Some(u0);
        self
    }

    /// Starting eigenvalues, one per column of the basis. They are projected
    /// onto the ordering constraint before use.
    pub fn initial_values(mut self, xi0: Vec<f64>) -> Self {
        self.initial_values = Some(xi0);
        self
    }

    pub fn schedule(mut self, schedule: SmoothingSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn accelerated(mut self, accelerated: bool) -> Self {
        self.accelerated = accelerated;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn build(self) -> SpEigenCov<T> {
        SpEigenCov {
            n_components: self.n_components,
            rho: self.rho,
            data: self.data,
            initial_vectors: self.initial_vectors,
            initial_values: self.initial_values,
            schedule: self.schedule,
            accelerated: self.accelerated,
            tolerance: self.tolerance,
            max_iter: self.max_iter,
        }
    }
}

impl<T: FieldOps> Default for SpEigenCovBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SpEigenCov<T: FieldOps> {
    n_components: usize,
    rho: Sparsity,
    data: bool,
    initial_vectors: Option<Array2<T>>,
    initial_values: Option<Vec<f64>>,
    schedule: SmoothingSchedule,
    accelerated: bool,
    tolerance: f64,
    max_iter: usize,
}

#[derive(Debug, Clone)]
pub struct SpEigenCovResult<T: FieldOps> {
    /// `m × m` unitary; the first `q` columns are sparse.
    pub vectors: Array2<T>,
    /// Non-increasing, tied past `q`.
    pub values: Array1<f64>,
    /// `U Diag(ξ) Uᴴ`.
    pub cov: Array2<T>,
    pub iterations: usize,
    pub converged: bool,
    pub levels: Vec<LevelReport>,
}

impl<T: FieldOps> SpEigenCovResult<T> {
    /// Inverse of the fitted covariance, `U Diag(ξ)⁻¹ Uᴴ`.
    pub fn precision(&self) -> Array2<T> {
        let u = to_dmatrix(self.vectors.view());
        let inverse = DVector::from_iterator(self.values.len(), self.values.iter().map(|x| 1.0 / x));
        to_array2(assemble_covariance(&u, &inverse))
    }
}

impl<T: FieldOps> SpEigenCov<T> {
    pub fn builder() -> SpEigenCovBuilder<T> {
        SpEigenCovBuilder::new()
    }

    pub fn fit(&self, x: ArrayView2<'_, T>) -> Result<SpEigenCovResult<T>> {
        let spectrum = Spectrum::from_input(x, self.data)?;
        let q = self.n_components;
        spectrum.require_rank(q)?;
        let m = spectrum.dim();

        let rho_max = spectrum.rho_max_likelihood(q);
        let rho: Vec<f64> = self
            .rho
            .resolve(q)?
            .into_iter()
            .zip(&rho_max)
            .map(|(r, max)| r * max)
            .collect();

        let start = EigenPair {
            vectors: match &self.initial_vectors {
                Some(u0) => initial_basis(u0.view(), m, m)?,
                None => spectrum.vectors().clone(),
            },
            values: self.initial_values(&spectrum, q)?,
        };

        let lambda_max = spectrum.lambda_max();
        let shifted = spectrum.covariance() - DMatrix::<T>::identity(m, m) * T::from_real(lambda_max);
        let problem = JointProblem {
            covariance: spectrum.covariance(),
            shifted: &shifted,
            lambda_max,
            q,
            rho: &rho,
        };
        let outcome =
            ContinuationScheduler::new(&self.schedule, self.accelerated, self.tolerance, self.max_iter)?
                .run(&problem, start)?;

        let iterations = outcome.iterations();
        let converged = outcome.converged();
        let EigenPair { vectors, values } = outcome.point;
        let cov = assemble_covariance(&vectors, &values);

        info!(
            "spEigenCov ({}): m = {}, q = {}, {} iterations over {} levels, converged = {}",
            T::field_name(),
            m,
            q,
            iterations,
            outcome.reports.len(),
            converged
        );

        Ok(SpEigenCovResult {
            vectors: to_array2(vectors),
            values: to_array1(&values),
            cov: to_array2(cov),
            iterations,
            converged,
            levels: outcome.reports,
        })
    }

    /// Leading sample eigenvalues with the tail averaged, or the
    /// user-supplied values projected onto the ordering constraint.
    fn initial_values(&self, spectrum: &Spectrum<T>, q: usize) -> Result<DVector<f64>> {
        let m = spectrum.dim();
        let xi0: Vec<f64> = match &self.initial_values {
            Some(xi0) => {
                if xi0.len() != m {
                    return Err(SpEigenError::invalid(format!(
                        "expected {} initial eigenvalues, got {}",
                        m,
                        xi0.len()
                    )));
                }
                if !xi0.iter().all(|x| x.is_finite() && *x > 0.0) {
                    return Err(SpEigenError::invalid(
                        "initial eigenvalues must be finite and positive",
                    ));
                }
                xi0.clone()
            }
            None => {
                let floor = spectrum.noise_floor(q);
                (0..m)
                    .map(|i| if i < q { spectrum.values()[i] } else { floor })
                    .collect()
            }
        };
        Ok(DVector::from_vec(project_ordered(&xi0, q)))
    }
}

/// `U Diag(ξ) Uᴴ`, symmetrized against round-off.
pub(crate) fn assemble_covariance<T: FieldOps>(u: &DMatrix<T>, xi: &DVector<f64>) -> DMatrix<T> {
    let mut scaled = u.clone();
    for (mut col, &x) in scaled.column_iter_mut().zip(xi.iter()) {
        col *= T::from_real(x);
    }
    hermitian_part(&(scaled * u.adjoint()))
}

/// Iterate of the joint problem.
#[derive(Debug, Clone)]
struct EigenPair<T: FieldOps> {
    vectors: DMatrix<T>,
    values: DVector<f64>,
}

struct JointProblem<'a, T: FieldOps> {
    covariance: &'a DMatrix<T>,
    /// `S − λ_max I`, negative semidefinite.
    shifted: &'a DMatrix<T>,
    lambda_max: f64,
    q: usize,
    rho: &'a [f64],
}

impl<T: FieldOps> MajorizationStep for JointProblem<'_, T> {
    type Point = EigenPair<T>;

    fn sense(&self) -> Sense {
        Sense::Minimize
    }

    fn step(&self, x: &EigenPair<T>, ctx: &IterationContext) -> Result<EigenPair<T>> {
        let inverse: Vec<f64> = x.values.iter().map(|v| 1.0 / v).collect();

        let mut curvature = self.shifted * &x.vectors;
        for (mut col, &phi) in curvature.column_iter_mut().zip(&inverse) {
            col *= T::from_real(phi);
        }
        let h = sparsity_majorizer(&x.vectors, self.rho, &ctx.level) + curvature;
        let vectors = procrustes_min(&h)?;

        // Tangent of the concave `c/ξ` terms at the previous ξ.
        let alpha: Vec<f64> = rayleigh_quotients(self.shifted, &vectors)
            .into_iter()
            .zip(&inverse)
            .map(|(c, phi)| -c * phi * phi)
            .collect();
        let values = solve_ordered_eigenvalues(&alpha, self.lambda_max, self.q)?;

        Ok(EigenPair { vectors, values })
    }

    fn objective(&self, x: &EigenPair<T>, ctx: &IterationContext) -> f64 {
        let fit: f64 = rayleigh_quotients(self.covariance, &x.vectors)
            .into_iter()
            .zip(x.values.iter())
            .map(|(c, &xi)| xi.ln() + c / xi)
            .sum();
        fit + penalty_total(&x.vectors, self.rho, &ctx.level)
    }

    fn extrapolate(
        &self,
        x0: &EigenPair<T>,
        x1: &EigenPair<T>,
        x2: &EigenPair<T>,
    ) -> Result<Option<EigenPair<T>>> {
        let r_u = &x1.vectors - &x0.vectors;
        let v_u = &x2.vectors - &x1.vectors * T::from_real(2.0) + &x0.vectors;
        let r_xi = &x1.values - &x0.values;
        let v_xi = &x2.values - &x1.values * 2.0 + &x0.values;

        let r_norm = (r_u.norm_squared() + r_xi.norm_squared()).sqrt();
        let v_norm = (v_u.norm_squared() + v_xi.norm_squared()).sqrt();
        let alpha = match step_length(r_norm, v_norm) {
            Some(alpha) => alpha,
            None => return Ok(None),
        };

        let values = &x0.values - r_xi * (2.0 * alpha) + v_xi * (alpha * alpha);
        if !values.iter().all(|x| x.is_finite() && *x > 0.0) {
            return Ok(None);
        }
        let vectors =
            &x0.vectors - r_u * T::from_real(2.0 * alpha) + v_u * T::from_real(alpha * alpha);
        if !all_finite(&vectors) {
            return Ok(None);
        }

        Ok(Some(EigenPair {
            vectors: procrustes_max(&vectors)?,
            values: DVector::from_vec(project_ordered(values.as_slice(), self.q)),
        }))
    }

    fn change(&self, prev: &EigenPair<T>, next: &EigenPair<T>) -> f64 {
        let values = (&next.values - &prev.values).norm() / prev.values.norm();
        relative_change(&prev.vectors, &next.vectors).max(values)
    }
}

/// spEigenCov with default settings apart from `q`, a uniform `rho`, and how
/// to read `x`.
pub fn sp_eigen_cov<T: FieldOps>(
    x: ArrayView2<'_, T>,
    n_components: usize,
    rho: f64,
    data: bool,
) -> Result<SpEigenCovResult<T>> {
    SpEigenCovBuilder::new()
        .n_components(n_components)
        .rho(rho)
        .data(data)
        .build()
        .fit(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordered::is_ordered;
    use crate::surrogate::SmoothingLevel;
    use crate::utils::{gram_defect, orthonormality_defect};
    use approx::assert_abs_diff_eq;
    use nalgebra::Complex;

    /// Two spikes on disjoint supports over unit noise.
    fn spiked(m: usize) -> DMatrix<f64> {
        let mut s = DMatrix::<f64>::identity(m, m);
        let h = 0.5;
        for (block, lambda) in [(0..4, 12.0), (4..8, 6.0)] {
            for i in block.clone() {
                for j in block.clone() {
                    s[(i, j)] += (lambda - 1.0) * h * h;
                }
            }
        }
        s
    }

    fn dense(s: &DMatrix<f64>) -> Array2<f64> {
        Array2::from_shape_fn(s.shape(), |(i, j)| s[(i, j)])
    }

    fn problem_parts(
        s: &DMatrix<f64>,
        q: usize,
        rho: f64,
    ) -> anyhow::Result<(Spectrum<f64>, DMatrix<f64>, Vec<f64>)> {
        let spectrum = Spectrum::from_covariance(s)?;
        let m = spectrum.dim();
        let shifted = s - DMatrix::identity(m, m) * spectrum.lambda_max();
        let rho = spectrum
            .rho_max_likelihood(q)
            .into_iter()
            .map(|r| rho * r)
            .collect();
        Ok((spectrum, shifted, rho))
    }

    #[test]
    fn test_assemble_and_precision_are_inverse() -> anyhow::Result<()> {
        let spectrum = Spectrum::from_covariance(&spiked(10))?;
        let cov = assemble_covariance(spectrum.vectors(), spectrum.values());
        assert!((&cov - spiked(10)).norm() < 1e-10);

        let result = SpEigenCovResult {
            vectors: to_array2(spectrum.vectors().clone()),
            values: to_array1(spectrum.values()),
            cov: to_array2(cov.clone()),
            iterations: 0,
            converged: true,
            levels: Vec::new(),
        };
        let product = cov * to_dmatrix(result.precision().view());
        assert!((product - DMatrix::<f64>::identity(10, 10)).norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_plain_steps_never_increase_objective() -> anyhow::Result<()> {
        let mut s = spiked(10);
        s[(0, 6)] += 0.4;
        s[(6, 0)] += 0.4;
        let (spectrum, shifted, rho) = problem_parts(&s, 2, 0.5)?;
        let problem = JointProblem {
            covariance: spectrum.covariance(),
            shifted: &shifted,
            lambda_max: spectrum.lambda_max(),
            q: 2,
            rho: &rho,
        };
        let ctx = IterationContext::new(SmoothingLevel::new(1e-3, 1e-3)?, 0);

        let floor = spectrum.noise_floor(2);
        let mut x = EigenPair {
            vectors: spectrum.vectors().clone(),
            values: DVector::from_fn(10, |i, _| if i < 2 { spectrum.values()[i] } else { floor }),
        };
        let mut last = problem.objective(&x, &ctx);
        for _ in 0..50 {
            x = problem.step(&x, &ctx)?;
            assert!(gram_defect(&x.vectors) < 1e-10);
            assert!(is_ordered(x.values.as_slice(), 2));
            let f = problem.objective(&x, &ctx);
            assert!(f <= last + 1e-10, "objective rose from {} to {}", last, f);
            last = f;
        }
        Ok(())
    }

    #[test]
    fn test_fit_orders_values_and_keeps_unitary_basis() -> anyhow::Result<()> {
        let s = spiked(12);
        let fit = SpEigenCovBuilder::new()
            .n_components(2)
            .rho(0.5)
            .build()
            .fit(dense(&s).view())?;

        assert!(orthonormality_defect(fit.vectors.view()) < 1e-10);
        assert!(is_ordered(&fit.values.to_vec(), 2));
        assert_eq!(fit.values.len(), 12);
        assert_abs_diff_eq!(fit.values[0], 12.0, epsilon = 0.5);
        Ok(())
    }

    #[test]
    fn test_complex_fit_matches_real() -> anyhow::Result<()> {
        let real = spiked(10);
        let phase: Vec<Complex<f64>> = (0..10)
            .map(|k| Complex::from_polar(1.0, 0.3 * k as f64))
            .collect();
        let s = Array2::from_shape_fn((10, 10), |(i, j)| {
            phase[i] * Complex::new(real[(i, j)], 0.0) * phase[j].conj()
        });
        let s_real = dense(&real);

        let complex = sp_eigen_cov(s.view(), 2, 0.5, false)?;
        let reference = sp_eigen_cov(s_real.view(), 2, 0.5, false)?;

        assert!(orthonormality_defect(complex.vectors.view()) < 1e-10);
        for (a, b) in complex.values.iter().zip(reference.values.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_initial_values() {
        let s = dense(&spiked(10));
        let too_short = SpEigenCovBuilder::new().initial_values(vec![1.0; 3]).build();
        assert!(matches!(
            too_short.fit(s.view()),
            Err(SpEigenError::InvalidInput(_))
        ));
        let negative = SpEigenCovBuilder::new()
            .initial_values(vec![-1.0; 10])
            .build();
        assert!(negative.fit(s.view()).is_err());
    }
}
