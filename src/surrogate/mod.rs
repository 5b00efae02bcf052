use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::error::{Result, SpEigenError};
use crate::utils::FieldOps;

/// One `(p, ε)` pair of the continuation schedule.
///
/// `g_{p,ε}` approximates the indicator `x ≠ 0`: quadratic on `|x| ≤ ε`,
/// logarithmic beyond. Around `u` it is majorized by `g(u) + w(u) (x² − u²)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingLevel {
    p: f64,
    eps: f64,
}

impl SmoothingLevel {
    pub fn new(p: f64, eps: f64) -> Result<Self> {
        if !(p.is_finite() && p > 0.0) {
            return Err(SpEigenError::invalid(format!(
                "smoothing parameter p must be positive, got {}",
                p
            )));
        }
        if !(eps.is_finite() && eps > 0.0) {
            return Err(SpEigenError::invalid(format!(
                "smoothing parameter eps must be positive, got {}",
                eps
            )));
        }
        Ok(SmoothingLevel { p, eps })
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// `ln(1 + 1/p)`, the normalizer that makes `g(1) → 1`.
    #[inline]
    fn normalizer(&self) -> f64 {
        (1.0 / self.p).ln_1p()
    }

    /// `g_{p,ε}(x)`.
    pub fn penalty(&self, x: f64) -> f64 {
        let a = x.abs();
        let (p, eps) = (self.p, self.eps);
        if a <= eps {
            a * a / (2.0 * eps * (p + eps) * self.normalizer())
        } else {
            (((p + a) / (p + eps)).ln() + eps / (2.0 * (p + eps))) / self.normalizer()
        }
    }

    /// Majorizing weight `w(u)` for unit sparsity weight; scale by `ρ`.
    ///
    /// On `|u| ≤ ε` the weight is the constant curvature of the quadratic
    /// branch, so `u = 0` is well defined.
    pub fn weight(&self, magnitude: f64) -> f64 {
        let a = magnitude.abs();
        let (p, eps) = (self.p, self.eps);
        if a <= eps {
            1.0 / (2.0 * eps * (p + eps) * self.normalizer())
        } else {
            1.0 / (2.0 * self.normalizer() * a * (a + p))
        }
    }
}

/// `Σ_j ρ_j Σ_i g(|u_ij|)` over the first `rho.len()` columns of `u`.
pub fn penalty_total<T: FieldOps>(u: &DMatrix<T>, rho: &[f64], level: &SmoothingLevel) -> f64 {
    rho.iter()
        .enumerate()
        .filter(|&(_, &r)| r > 0.0)
        .map(|(j, &r)| {
            r * u
                .column(j)
                .iter()
                .map(|x| level.penalty(x.modulus()))
                .sum::<f64>()
        })
        .sum()
}

/// Linear term of the sparsity majorizer, `H = (W − 𝟙 w_maxᵀ) ⊙ U`.
///
/// Column `j` uses its own `ρ_j`; columns past `rho.len()` are unpenalized
/// and left at zero. Every entry of `W − 𝟙 w_maxᵀ` is non-positive.
pub fn sparsity_majorizer<T: FieldOps>(
    u: &DMatrix<T>,
    rho: &[f64],
    level: &SmoothingLevel,
) -> DMatrix<T> {
    let (m, k) = u.shape();
    debug_assert!(rho.len() <= k);

    let columns: Vec<Vec<T>> = (0..rho.len())
        .into_par_iter()
        .map(|j| {
            let col = u.column(j);
            let w: Vec<f64> = col
                .iter()
                .map(|x| rho[j] * level.weight(x.modulus()))
                .collect();
            let w_max = w.iter().copied().fold(0.0, f64::max);
            col.iter()
                .zip(w)
                .map(|(&x, wi)| x * T::from_real(wi - w_max))
                .collect()
        })
        .collect();

    let mut h = DMatrix::<T>::zeros(m, k);
    for (j, col) in columns.into_iter().enumerate() {
        for (i, v) in col.into_iter().enumerate() {
            h[(i, j)] = v;
        }
    }
    h
}
