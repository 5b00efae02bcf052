use nalgebra::{Complex, ComplexField, DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2, LinalgScalar, ScalarOperand};
use nshare::{IntoNalgebra, IntoNdarray2};

/// Scalar field the solvers run over: `f64` for real symmetric input,
/// `Complex<f64>` for complex Hermitian input.
///
/// Every formula is written once against this trait. Conjugation, modulus and
/// real-part extraction come from [`ComplexField`]; all spectral quantities
/// (eigenvalues, weights, objectives) stay in `f64`.
pub trait FieldOps:
    ComplexField<RealField = f64> + nalgebra::Scalar + LinalgScalar + ScalarOperand + Copy
{
    /// Name of the field, used in log output.
    fn field_name() -> &'static str;
}

impl FieldOps for f64 {
    fn field_name() -> &'static str {
        "real"
    }
}

impl FieldOps for Complex<f64> {
    fn field_name() -> &'static str {
        "complex"
    }
}

pub(crate) fn to_dmatrix<T: FieldOps>(x: ArrayView2<'_, T>) -> DMatrix<T> {
    x.to_owned().into_nalgebra()
}

pub(crate) fn to_array2<T: FieldOps>(x: DMatrix<T>) -> Array2<T> {
    x.into_ndarray2().into_owned()
}

pub(crate) fn to_array1(x: &DVector<f64>) -> Array1<f64> {
    Array1::from_iter(x.iter().copied())
}

/// Frobenius norm of `UᴴU − I`.
///
/// Zero for a column-orthonormal (unitary, in the complex case) matrix.
pub fn orthonormality_defect<T: FieldOps>(u: ArrayView2<'_, T>) -> f64 {
    gram_defect(&to_dmatrix(u))
}

pub(crate) fn gram_defect<T: FieldOps>(u: &DMatrix<T>) -> f64 {
    let q = u.ncols();
    (u.adjoint() * u - DMatrix::<T>::identity(q, q)).norm()
}

/// Largest entrywise deviation `|s_ij − conj(s_ji)|`.
pub(crate) fn hermitian_defect<T: FieldOps>(s: &DMatrix<T>) -> f64 {
    let mut worst = 0.0f64;
    for j in 0..s.ncols() {
        for i in 0..=j {
            let d = (s[(i, j)] - s[(j, i)].conjugate()).modulus();
            worst = worst.max(d);
        }
    }
    worst
}

pub(crate) fn hermitian_part<T: FieldOps>(s: &DMatrix<T>) -> DMatrix<T> {
    (s + s.adjoint()) * T::from_real(0.5)
}

pub(crate) fn all_finite<T: FieldOps>(m: &DMatrix<T>) -> bool {
    m.iter().all(|x| x.is_finite())
}

/// `‖next − prev‖_F / ‖prev‖_F`, falling back to the absolute change when
/// `prev` vanishes.
pub(crate) fn relative_change<T: FieldOps>(prev: &DMatrix<T>, next: &DMatrix<T>) -> f64 {
    let diff = (next - prev).norm();
    let base = prev.norm();
    if base > 0.0 {
        diff / base
    } else {
        diff
    }
}

/// `Re(uⱼᴴ S uⱼ)` for every column of `u`.
pub(crate) fn rayleigh_quotients<T: FieldOps>(s: &DMatrix<T>, u: &DMatrix<T>) -> Vec<f64> {
    let su = s * u;
    u.column_iter()
        .zip(su.column_iter())
        .map(|(uj, suj)| uj.dotc(&suj).real())
        .collect()
}

/// Largest squared modulus in each column.
pub(crate) fn column_peak_energy<T: FieldOps>(u: &DMatrix<T>) -> Vec<f64> {
    u.column_iter()
        .map(|col| col.iter().map(|x| x.modulus_squared()).fold(0.0, f64::max))
        .collect()
}
