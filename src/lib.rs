pub mod accel;
pub mod continuation;
pub mod convergence;
pub mod error;
pub mod ordered;
pub mod pca;
pub mod spectral;
pub mod surrogate;
pub mod svd;
mod utils;

pub use continuation::SmoothingSchedule;
pub use error::SpEigenError;
pub use pca::{
    sp_eigen, sp_eigen_cov, Sparsity, SpEigen, SpEigenBuilder, SpEigenCov, SpEigenCovBuilder,
    SpEigenCovResult, SpEigenResult,
};
pub use utils::orthonormality_defect;
pub use utils::FieldOps;
