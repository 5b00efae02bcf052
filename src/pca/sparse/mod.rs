//! Sparse leading eigenvectors: maximizes `Σⱼ dⱼ uⱼᴴ S uⱼ − Σⱼ ρⱼ Σᵢ g(|u_ij|)`
//! over column-orthonormal `U`.

use log::info;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

use crate::accel::{step_length, IterationContext, MajorizationStep, Sense};
use crate::continuation::{ContinuationScheduler, SmoothingSchedule};
use crate::convergence::LevelReport;
use crate::error::{Result, SpEigenError};
use crate::pca::{initial_basis, Sparsity};
use crate::spectral::Spectrum;
use crate::surrogate::{penalty_total, sparsity_majorizer};
use crate::svd::procrustes_max;
use crate::utils::{all_finite, rayleigh_quotients, relative_change, to_array2, FieldOps};

pub struct SpEigenBuilder<T: FieldOps> {
    n_components: usize,
    rho: Sparsity,
    data: bool,
    weights: Option<Vec<f64>>,
    initial_vectors: Option<Array2<T>>,
    schedule: SmoothingSchedule,
    accelerated: bool,
    tolerance: f64,
    max_iter: usize,
}

impl<T: FieldOps> SpEigenBuilder<T> {
    pub fn new() -> Self {
        SpEigenBuilder {
            n_components: 1,
            rho: Sparsity::default(),
            data: false,
            weights: None,
            initial_vectors: None,
            schedule: SmoothingSchedule::default(),
            accelerated: true,
            tolerance: 1e-8,
            max_iter: 1000,
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    /// Uniform (`f64`) or per-component (`Vec<f64>`) sparsity in units of `ρ_max`.
    pub fn rho(mut self, rho: impl Into<Sparsity>) -> Self {
        self.rho = rho.into();
        self
    }

    /// Read the input as an `n × m` data matrix instead of a covariance matrix.
    pub fn data(mut self, data: bool) -> Self {
        self.data = data;
        self
    }

    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn initial_vectors(mut self, u0: Array2<T>) -> Self {
        self.initial_vectors = Some(u0);
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

    pub fn build(self) -> SpEigen<T> {
        SpEigen {
            n_components: self.n_components,
            rho: self.rho,
            data: self.data,
            weights: self.weights,
            initial_vectors: self.initial_vectors,
            schedule: self.schedule,
            accelerated: self.accelerated,
            tolerance: self.tolerance,
            max_iter: self.max_iter,
        }
    }
}

impl<T: FieldOps> Default for SpEigenBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Configured spEigen fitter. Fitting does not mutate it.
#[derive(Debug, Clone)]
pub struct SpEigen<T: FieldOps> {
    n_components: usize,
    rho: Sparsity,
    data: bool,
    weights: Option<Vec<f64>>,
    initial_vectors: Option<Array2<T>>,
    schedule: SmoothingSchedule,
    accelerated: bool,
    tolerance: f64,
    max_iter: usize,
}

#[derive(Debug, Clone)]
pub struct SpEigenResult<T: FieldOps> {
    /// `m × q`, column-orthonormal.
    pub vectors: Array2<T>,
    /// `diag(UᴴSU)`.
    pub values: Array1<f64>,
    pub iterations: usize,
    /// Whether the tightest smoothing level met the tolerance.
    pub converged: bool,
    pub levels: Vec<LevelReport>,
}

impl<T: FieldOps> SpEigenResult<T> {
    /// Entries per column with modulus above `threshold`.
    pub fn cardinality(&self, threshold: f64) -> Vec<usize> {
        self.vectors
            .columns()
            .into_iter()
            .map(|col| col.iter().filter(|x| x.modulus() > threshold).count())
            .collect()
    }
}

impl<T: FieldOps> SpEigen<T> {
    pub fn builder() -> SpEigenBuilder<T> {
        SpEigenBuilder::new()
    }

    pub fn fit(&self, x: ArrayView2<'_, T>) -> Result<SpEigenResult<T>> {
        let spectrum = Spectrum::from_input(x, self.data)?;
        self.fit_spectrum(&spectrum, &self.rho)
    }

    /// Fits once per uniform sparsity level, sharing one eigendecomposition.
    /// The fits are independent and run in parallel.
    pub fn fit_path(&self, x: ArrayView2<'_, T>, rhos: &[f64]) -> Result<Vec<SpEigenResult<T>>> {
        let spectrum = Spectrum::from_input(x, self.data)?;
        rhos.par_iter()
            .map(|&rho| self.fit_spectrum(&spectrum, &Sparsity::Uniform(rho)))
            .collect()
    }

    fn fit_spectrum(&self, spectrum: &Spectrum<T>, rho: &Sparsity) -> Result<SpEigenResult<T>> {
        let q = self.n_components;
        spectrum.require_rank(q)?;

        let weights = self.resolve_weights(q)?;
        let rho_max = spectrum.rho_max_weighted(&weights);
        let rho: Vec<f64> = rho
            .resolve(q)?
            .into_iter()
            .zip(&rho_max)
            .map(|(r, max)| r * max)
            .collect();

        let u0 = match &self.initial_vectors {
            Some(u0) => initial_basis(u0.view(), spectrum.dim(), q)?,
            None => spectrum.leading_vectors(q),
        };

        let problem = SparseEigenProblem {
            covariance: spectrum.covariance(),
            weights: &weights,
            rho: &rho,
        };
        let outcome =
            ContinuationScheduler::new(&self.schedule, self.accelerated, self.tolerance, self.max_iter)?
                .run(&problem, u0)?;

        let iterations = outcome.iterations();
        let converged = outcome.converged();
        let u = outcome.point;
        let values = rayleigh_quotients(spectrum.covariance(), &u);

        info!(
            "spEigen ({}): m = {}, q = {}, {} iterations over {} levels, converged = {}",
            T::field_name(),
            spectrum.dim(),
            q,
            iterations,
            outcome.reports.len(),
            converged
        );

        Ok(SpEigenResult {
            vectors: to_array2(u),
            values: Array1::from(values),
            iterations,
            converged,
            levels: outcome.reports,
        })
    }

    fn resolve_weights(&self, q: usize) -> Result<Vec<f64>> {
        let weights = match &self.weights {
            Some(d) => d.clone(),
            None => default_weights(q),
        };
        if weights.len() != q {
            return Err(SpEigenError::invalid(format!(
                "expected {} weights, got {}",
                q,
                weights.len()
            )));
        }
        if !weights.iter().all(|d| d.is_finite() && *d > 0.0)
            || !weights.windows(2).all(|w| w[1] < w[0])
        {
            return Err(SpEigenError::invalid(
                "weights must be positive and strictly decreasing",
            ));
        }
        Ok(weights)
    }
}

/// `q` evenly spaced weights from 1 down to 1/2.
fn default_weights(q: usize) -> Vec<f64> {
    if q == 1 {
        return vec![1.0];
    }
    (0..q)
        .map(|i| 1.0 - 0.5 * i as f64 / (q - 1) as f64)
        .collect()
}

struct SparseEigenProblem<'a, T: FieldOps> {
    covariance: &'a DMatrix<T>,
    weights: &'a [f64],
    rho: &'a [f64],
}

impl<T: FieldOps> MajorizationStep for SparseEigenProblem<'_, T> {
    type Point = DMatrix<T>;

    fn sense(&self) -> Sense {
        Sense::Maximize
    }

    fn step(&self, u: &DMatrix<T>, ctx: &IterationContext) -> Result<DMatrix<T>> {
        let mut g = self.covariance * u;
        for (mut col, &d) in g.column_iter_mut().zip(self.weights) {
            col *= T::from_real(d);
        }
        let h = sparsity_majorizer(u, self.rho, &ctx.level);
        procrustes_max(&(g - h))
    }

    fn objective(&self, u: &DMatrix<T>, ctx: &IterationContext) -> f64 {
        let variance: f64 = rayleigh_quotients(self.covariance, u)
            .into_iter()
            .zip(self.weights)
            .map(|(v, d)| d * v)
            .sum();
        variance - penalty_total(u, self.rho, &ctx.level)
    }

    fn extrapolate(
        &self,
        u0: &DMatrix<T>,
        u1: &DMatrix<T>,
        u2: &DMatrix<T>,
    ) -> Result<Option<DMatrix<T>>> {
        let r = u1 - u0;
        let v = u2 - u1 * T::from_real(2.0) + u0;
        let alpha = match step_length(r.norm(), v.norm()) {
            Some(alpha) => alpha,
            None => return Ok(None),
        };
        let extrapolated = u0 - r * T::from_real(2.0 * alpha) + v * T::from_real(alpha * alpha);
        if !all_finite(&extrapolated) {
            return Ok(None);
        }
        procrustes_max(&extrapolated).map(Some)
    }

    fn change(&self, prev: &DMatrix<T>, next: &DMatrix<T>) -> f64 {
        relative_change(prev, next)
    }
}

/// spEigen with default settings apart from `q`, a uniform `rho`, and how
/// to read `x`.
pub fn sp_eigen<T: FieldOps>(
    x: ArrayView2<'_, T>,
    n_components: usize,
    rho: f64,
    data: bool,
) -> Result<SpEigenResult<T>> {
    SpEigenBuilder::new()
        .n_components(n_components)
        .rho(rho)
        .data(data)
        .build()
        .fit(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::SmoothingLevel;
    use crate::utils::{gram_defect, orthonormality_defect, to_dmatrix};
    use approx::assert_abs_diff_eq;
    use nalgebra::Complex;
    use ndarray::Array2;

    /// Covariance with two sparse leading directions on disjoint supports.
    fn block_covariance() -> Array2<f64> {
        let m = 8;
        let mut s = Array2::<f64>::eye(m) * 0.5;
        let h = 0.5;
        for (block, lambda) in [(0..4, 10.0), (4..8, 5.0)] {
            for i in block.clone() {
                for j in block.clone() {
                    s[[i, j]] += (lambda - 0.5) * h * h;
                }
            }
        }
        s
    }

    #[test]
    fn test_default_weights() {
        assert_eq!(default_weights(1), vec![1.0]);
        assert_eq!(default_weights(3), vec![1.0, 0.75, 0.5]);
    }

    #[test]
    fn test_null_penalty_returns_leading_eigenvectors() -> anyhow::Result<()> {
        let s = block_covariance();
        let fit = SpEigenBuilder::new()
            .n_components(2)
            .rho(0.0)
            .build()
            .fit(s.view())?;

        assert!(orthonormality_defect(fit.vectors.view()) < 1e-10);
        assert_abs_diff_eq!(fit.values[0], 10.0, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.values[1], 5.0, epsilon = 1e-8);
        assert!(fit.converged);
        Ok(())
    }

    #[test]
    fn test_recovers_block_supports() -> anyhow::Result<()> {
        let s = block_covariance();
        let fit = SpEigenBuilder::new()
            .n_components(2)
            .rho(0.5)
            .build()
            .fit(s.view())?;

        assert_eq!(fit.cardinality(1e-6), vec![4, 4]);
        for i in 0..4 {
            assert_abs_diff_eq!(fit.vectors[[i, 0]].abs(), 0.5, epsilon = 1e-6);
            assert_abs_diff_eq!(fit.vectors[[i + 4, 1]].abs(), 0.5, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_plain_steps_never_decrease_objective() -> anyhow::Result<()> {
        // Perturb so the starting point is not already optimal.
        let mut s = to_dmatrix(block_covariance().view());
        s[(0, 5)] += 0.3;
        s[(5, 0)] += 0.3;
        let spectrum = Spectrum::from_covariance(&s)?;
        let weights = vec![1.0, 0.5];
        let rho: Vec<f64> = spectrum
            .rho_max_weighted(&weights)
            .into_iter()
            .map(|r| 0.6 * r)
            .collect();
        let problem = SparseEigenProblem {
            covariance: spectrum.covariance(),
            weights: &weights,
            rho: &rho,
        };
        let ctx = IterationContext::new(SmoothingLevel::new(1e-3, 1e-3)?, 0);

        let mut u = spectrum.leading_vectors(2);
        let mut last = problem.objective(&u, &ctx);
        for _ in 0..50 {
            u = problem.step(&u, &ctx)?;
            assert!(gram_defect(&u) < 1e-10);
            let f = problem.objective(&u, &ctx);
            assert!(f >= last - 1e-10, "objective fell from {} to {}", last, f);
            last = f;
        }
        Ok(())
    }

    #[test]
    fn test_complex_input_keeps_unitary_columns() -> anyhow::Result<()> {
        let real = block_covariance();
        let m = real.nrows();
        // Conjugating by a diagonal phase keeps the matrix Hermitian PSD.
        let phase: Vec<Complex<f64>> = (0..m)
            .map(|k| Complex::from_polar(1.0, 0.4 * k as f64))
            .collect();
        let s = Array2::from_shape_fn((m, m), |(i, j)| {
            phase[i] * Complex::new(real[[i, j]], 0.0) * phase[j].conj()
        });

        let fit = SpEigenBuilder::new()
            .n_components(2)
            .rho(0.5)
            .build()
            .fit(s.view())?;
        assert!(orthonormality_defect(fit.vectors.view()) < 1e-10);
        assert_eq!(fit.cardinality(1e-6), vec![4, 4]);
        assert_abs_diff_eq!(fit.values[0], 10.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_fit_path_matches_individual_fits() -> anyhow::Result<()> {
        let s = block_covariance();
        let model = SpEigenBuilder::new().n_components(2).build();
        let path = model.fit_path(s.view(), &[0.0, 0.5])?;
        assert_eq!(path.len(), 2);

        let single = SpEigenBuilder::new()
            .n_components(2)
            .rho(0.5)
            .build()
            .fit(s.view())?;
        for (a, b) in path[1].vectors.iter().zip(single.vectors.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_configuration() {
        let s = block_covariance();
        let fit = |b: SpEigenBuilder<f64>| b.build().fit(s.view());

        assert!(matches!(
            fit(SpEigenBuilder::new().n_components(0)),
            Err(SpEigenError::InvalidInput(_))
        ));
        assert!(fit(SpEigenBuilder::new().n_components(9)).is_err());
        assert!(fit(SpEigenBuilder::new().rho(-1.0)).is_err());
        assert!(fit(SpEigenBuilder::new().n_components(2).weights(vec![0.5, 1.0])).is_err());
        assert!(fit(SpEigenBuilder::new().tolerance(0.0)).is_err());
        assert!(fit(SpEigenBuilder::new().initial_vectors(Array2::zeros((8, 1)))).is_err());
    }
}
