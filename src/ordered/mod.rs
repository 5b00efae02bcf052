//! Solves
//!
//! ```text
//! minimize   Σᵢ ln ξᵢ + αᵢ ξᵢ + λ_max / ξᵢ
//! subject to ξ₁ ≥ … ≥ ξ_q ≥ ξ_{q+1} = … = ξ_m > 0
//! ```
//!
//! in finitely many steps. Under `φ = 1/ξ` each term is convex and a block of
//! tied entries has the closed-form optimum `ξ(ᾱ) = 2λ_max / (1 + √(1 + 4λ_max ᾱ))`,
//! which depends on the block only through its mean `ᾱ`. Pool-adjacent-violators
//! over a stack of blocks then yields the exact constrained optimum: adjacent
//! blocks that violate the ordering are merged and re-solved, never clipped.

use nalgebra::DVector;

use crate::error::{Result, SpEigenError};

#[derive(Debug, Clone, Copy)]
struct Block {
    total: f64,
    len: usize,
    value: f64,
}

/// Merges adjacent blocks until the block values are non-increasing.
///
/// `stats` holds `(sum, count)` per initial block, `solve` maps them to the
/// block's optimal common value. Returns one value per element.
fn pool_non_increasing<F>(stats: impl IntoIterator<Item = (f64, usize)>, solve: F) -> Vec<f64>
where
    F: Fn(f64, usize) -> f64,
{
    let mut stack: Vec<Block> = Vec::new();
    for (total, len) in stats {
        let mut block = Block {
            total,
            len,
            value: solve(total, len),
        };
        while stack.last().is_some_and(|prev| prev.value < block.value) {
            if let Some(prev) = stack.pop() {
                let total = prev.total + block.total;
                let len = prev.len + block.len;
                block = Block {
                    total,
                    len,
                    value: solve(total, len),
                };
            }
        }
        stack.push(block);
    }

    stack
        .into_iter()
        .flat_map(|b| std::iter::repeat_n(b.value, b.len))
        .collect()
}

/// Initial blocks: one per leading entry, one tied block for the tail.
fn leading_and_tail(values: &[f64], q: usize) -> Vec<(f64, usize)> {
    let mut stats: Vec<(f64, usize)> = values[..q].iter().map(|&v| (v, 1)).collect();
    if values.len() > q {
        stats.push((values[q..].iter().sum(), values.len() - q));
    }
    stats
}

/// Optimal common `ξ` of a block with mean coefficient `alpha_mean`.
#[inline]
fn block_optimum(alpha_mean: f64, lambda_max: f64) -> f64 {
    2.0 * lambda_max / (1.0 + (1.0 + 4.0 * lambda_max * alpha_mean).sqrt())
}

/// Exact minimizer of the ordered log-barrier problem.
///
/// `alpha` has one non-negative coefficient per eigenvalue (tiny negative
/// round-off is clamped to zero); the first `q` entries are free up to
/// ordering and the remaining `m − q` are tied.
pub fn solve_ordered_eigenvalues(alpha: &[f64], lambda_max: f64, q: usize) -> Result<DVector<f64>> {
    let m = alpha.len();
    if m == 0 || q == 0 || q > m {
        return Err(SpEigenError::invalid(format!(
            "ordered eigenvalue problem needs 1 <= q <= m, got q = {}, m = {}",
            q, m
        )));
    }
    if !(lambda_max.is_finite() && lambda_max > 0.0) {
        return Err(SpEigenError::invalid(format!(
            "lambda_max must be positive, got {}",
            lambda_max
        )));
    }
    if alpha.iter().any(|a| !a.is_finite()) {
        return Err(SpEigenError::numerical(
            "eigenvalue majorizer coefficients are not finite",
        ));
    }

    let clamped: Vec<f64> = alpha.iter().map(|&a| a.max(0.0)).collect();
    let xi = pool_non_increasing(leading_and_tail(&clamped, q), |total, len| {
        block_optimum(total / len as f64, lambda_max)
    });
    Ok(DVector::from_vec(xi))
}

/// Least-squares projection onto `{ξ₁ ≥ … ≥ ξ_q ≥ ξ_{q+1} = … = ξ_m}`.
pub fn project_ordered(values: &[f64], q: usize) -> Vec<f64> {
    let q = q.min(values.len());
    pool_non_increasing(leading_and_tail(values, q), |total, len| total / len as f64)
}

/// True when `xi` is positive, non-increasing, and tied past `q`.
pub fn is_ordered(xi: &[f64], q: usize) -> bool {
    xi.iter().all(|&x| x > 0.0)
        && xi.windows(2).all(|w| w[0] >= w[1])
        && xi.iter().skip(q).all(|&x| x == xi[xi.len() - 1])
}
