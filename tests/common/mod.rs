#![allow(dead_code)]

use nalgebra::{Complex, DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use sparse_eigen::FieldOps;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spiked covariance `I + Σₖ (λₖ − 1) vₖ vₖᴴ` whose leading eigenvectors are
/// flat on disjoint blocks of `block` consecutive coordinates.
pub struct SpikedModel {
    pub dim: usize,
    pub spikes: Vec<f64>,
    /// `dim × q` real eigenvectors.
    pub vectors: Array2<f64>,
}

impl SpikedModel {
    pub fn new(dim: usize, block: usize, spikes: &[f64]) -> Self {
        let q = spikes.len();
        assert!(q * block <= dim);
        let amplitude = 1.0 / (block as f64).sqrt();
        let vectors = Array2::from_shape_fn((dim, q), |(i, k)| {
            if i / block == k {
                amplitude
            } else {
                0.0
            }
        });
        SpikedModel {
            dim,
            spikes: spikes.to_vec(),
            vectors,
        }
    }

    pub fn covariance(&self) -> Array2<f64> {
        let mut r = Array2::<f64>::eye(self.dim);
        for (k, &lambda) in self.spikes.iter().enumerate() {
            let v = self.vectors.column(k);
            for i in 0..self.dim {
                for j in 0..self.dim {
                    r[[i, j]] += (lambda - 1.0) * v[i] * v[j];
                }
            }
        }
        r
    }

    /// Diagonal phases applied to the model, `e^{iθ_j}` with `θ_j = 0.37 j`.
    pub fn phases(&self) -> Vec<Complex<f64>> {
        (0..self.dim)
            .map(|j| Complex::from_polar(1.0, 0.37 * j as f64))
            .collect()
    }

    pub fn complex_vectors(&self) -> Array2<Complex<f64>> {
        let phases = self.phases();
        Array2::from_shape_fn(self.vectors.dim(), |(i, k)| {
            phases[i] * self.vectors[[i, k]]
        })
    }

    /// `n` real draws, one per row.
    pub fn sample(&self, n: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut x = Array2::<f64>::zeros((n, self.dim));
        for mut row in x.rows_mut() {
            for entry in row.iter_mut() {
                *entry = rng.sample(StandardNormal);
            }
            for (k, &lambda) in self.spikes.iter().enumerate() {
                let z: f64 = rng.sample(StandardNormal);
                let scale = (lambda - 1.0).sqrt() * z;
                row.scaled_add(scale, &self.vectors.column(k));
            }
        }
        x
    }

    /// `n` circularly symmetric complex draws from the phase-rotated model.
    ///
    /// Each row is a draw `yᵀ` with `E[y yᴴ] = R` for the phase-rotated `R`,
    /// so rows carry `conj(w)` and `XᴴX / (n − 1)` spikes along `w` itself.
    pub fn sample_complex(&self, n: usize, seed: u64) -> Array2<Complex<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let draw = |rng: &mut ChaCha8Rng| {
            let re: f64 = rng.sample(StandardNormal);
            let im: f64 = rng.sample(StandardNormal);
            Complex::new(h * re, h * im)
        };
        let vectors = self.complex_vectors();
        let mut x = Array2::<Complex<f64>>::zeros((n, self.dim));
        for mut row in x.rows_mut() {
            for entry in row.iter_mut() {
                *entry = draw(&mut rng);
            }
            for (k, &lambda) in self.spikes.iter().enumerate() {
                let scale = draw(&mut rng) * (lambda - 1.0).sqrt();
                row.zip_mut_with(&vectors.column(k), |x, &v| *x += scale * v.conj());
            }
        }
        x
    }
}

pub fn sample_covariance(x: &Array2<f64>) -> Array2<f64> {
    x.t().dot(x) / (x.nrows() - 1) as f64
}

pub fn sample_covariance_complex(x: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    let xh = x.t().mapv(|z| z.conj());
    xh.dot(x) / Complex::new((x.nrows() - 1) as f64, 0.0)
}

/// `|⟨a, b⟩|` under the conjugate inner product.
pub fn alignment<T: FieldOps>(a: ArrayView1<'_, T>, b: ArrayView1<'_, T>) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(T::from_real(0.0), |acc, (&x, &y)| acc + x.conjugate() * y)
        .modulus()
}

/// Top `q` eigenvectors of a real symmetric matrix, as columns.
pub fn leading_eigenvectors(s: &Array2<f64>, q: usize) -> Array2<f64> {
    let m = s.nrows();
    let eig = SymmetricEigen::new(DMatrix::from_fn(m, m, |i, j| s[[i, j]]));
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    Array2::from_shape_fn((m, q), |(i, k)| eig.eigenvectors[(i, order[k])])
}

pub fn frobenius<T: FieldOps>(a: &Array2<T>, b: &Array2<T>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y).modulus_squared())
        .sum::<f64>()
        .sqrt()
}
