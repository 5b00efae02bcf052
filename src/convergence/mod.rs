use crate::error::{Result, SpEigenError};
use crate::surrogate::SmoothingLevel;

/// Outcome of observing one inner iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue,
    Converged,
    /// Iteration cap reached before the tolerance was met.
    Exhausted,
}

/// Summary of the inner loop at one smoothing level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub level: SmoothingLevel,
    pub iterations: usize,
    pub converged: bool,
    /// Relative change of the last accepted iterate.
    pub final_change: f64,
    /// Objective value at the last accepted iterate.
    pub objective: f64,
}

/// Stopping rule for the inner MM loop: relative Frobenius change below
/// `tolerance`, or `max_iter` iterations.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    tolerance: f64,
    max_iter: usize,
    iterations: usize,
    last_change: f64,
}

impl ConvergenceMonitor {
    pub fn new(tolerance: f64, max_iter: usize) -> Result<Self> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(SpEigenError::invalid(format!(
                "tolerance must be positive, got {}",
                tolerance
            )));
        }
        if max_iter == 0 {
            return Err(SpEigenError::invalid("max_iter must be at least 1"));
        }
        Ok(ConvergenceMonitor {
            tolerance,
            max_iter,
            iterations: 0,
            last_change: f64::INFINITY,
        })
    }

    /// Records the change produced by one iteration.
    ///
    /// A non-finite change means the iterate itself stopped being finite.
    pub fn observe(&mut self, change: f64) -> Result<Status> {
        if !change.is_finite() {
            return Err(SpEigenError::numerical(format!(
                "iterate became non-finite after {} iterations",
                self.iterations
            )));
        }
        self.iterations += 1;
        self.last_change = change;

        if change < self.tolerance {
            Ok(Status::Converged)
        } else if self.iterations >= self.max_iter {
            Ok(Status::Exhausted)
        } else {
            Ok(Status::Continue)
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn last_change(&self) -> f64 {
        self.last_change
    }

    pub fn report(&self, level: SmoothingLevel, converged: bool, objective: f64) -> LevelReport {
        LevelReport {
            level,
            iterations: self.iterations,
            converged,
            final_change: self.last_change,
            objective,
        }
    }
}
