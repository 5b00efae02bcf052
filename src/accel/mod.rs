//! SQUAREM extrapolation (Varadhan and Roland) around an MM map `F`.
//!
//! From `x₀`, `x₁ = F(x₀)`, `x₂ = F(x₁)` form `r = x₁ − x₀`,
//! `v = x₂ − 2x₁ + x₀` and the point `x₀ − 2αr + α²v` with
//! `α = −max(1, ‖r‖/‖v‖)`. One more MM step is taken from its projection,
//! and that result is kept only if it is no worse than `x₂`.

use log::trace;

use crate::error::{Result, SpEigenError};
use crate::surrogate::SmoothingLevel;

/// Direction of optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Maximize,
    Minimize,
}

impl Sense {
    /// `candidate` is finite and no worse than `reference`.
    pub fn no_worse(self, candidate: f64, reference: f64) -> bool {
        if !candidate.is_finite() {
            return false;
        }
        match self {
            Sense::Maximize => candidate >= reference,
            Sense::Minimize => candidate <= reference,
        }
    }
}

/// State threaded explicitly through an inner MM solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationContext {
    pub level: SmoothingLevel,
    pub level_index: usize,
    pub iteration: usize,
}

impl IterationContext {
    pub fn new(level: SmoothingLevel, level_index: usize) -> Self {
        IterationContext {
            level,
            level_index,
            iteration: 0,
        }
    }
}

/// One majorization-minimization fixed-point map and what acceleration needs
/// to know about its iterates.
pub trait MajorizationStep {
    type Point: Clone;

    fn sense(&self) -> Sense;

    /// One plain MM update `F(x)`.
    fn step(&self, x: &Self::Point, ctx: &IterationContext) -> Result<Self::Point>;

    /// Smoothed objective at the level in `ctx`.
    fn objective(&self, x: &Self::Point, ctx: &IterationContext) -> f64;

    /// Extrapolated and projected point from three successive iterates, or
    /// `None` when no admissible extrapolation exists.
    fn extrapolate(
        &self,
        x0: &Self::Point,
        x1: &Self::Point,
        x2: &Self::Point,
    ) -> Result<Option<Self::Point>>;

    /// Relative change between two successive accepted iterates.
    fn change(&self, prev: &Self::Point, next: &Self::Point) -> f64;
}

/// SQUAREM step length `α = −max(1, ‖r‖/‖v‖)`.
///
/// `None` when `v` vanishes (the map is already at its fixed point along
/// this direction) or the norms are not finite.
pub fn step_length(r_norm: f64, v_norm: f64) -> Option<f64> {
    if !(r_norm.is_finite() && v_norm.is_finite()) || v_norm <= 0.0 {
        return None;
    }
    Some(-(r_norm / v_norm).max(1.0))
}

/// Result of one (possibly accelerated) iteration.
#[derive(Debug, Clone)]
pub struct Advance<P> {
    pub point: P,
    pub objective: f64,
    pub extrapolated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accelerator {
    enabled: bool,
}

impl Accelerator {
    pub fn new(enabled: bool) -> Self {
        Accelerator { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn advance<M: MajorizationStep>(
        &self,
        map: &M,
        x0: &M::Point,
        ctx: &IterationContext,
    ) -> Result<Advance<M::Point>> {
        let x1 = map.step(x0, ctx)?;
        if !self.enabled {
            let objective = map.objective(&x1, ctx);
            return Ok(Advance {
                point: x1,
                objective,
                extrapolated: false,
            });
        }

        let x2 = map.step(&x1, ctx)?;
        let plain = map.objective(&x2, ctx);

        if let Some(xe) = map.extrapolate(x0, &x1, &x2)? {
            match map.step(&xe, ctx) {
                Ok(candidate) => {
                    let objective = map.objective(&candidate, ctx);
                    if map.sense().no_worse(objective, plain) {
                        return Ok(Advance {
                            point: candidate,
                            objective,
                            extrapolated: true,
                        });
                    }
                    trace!(
                        "level {} iteration {}: extrapolation rejected ({:.6e} vs {:.6e})",
                        ctx.level_index,
                        ctx.iteration,
                        objective,
                        plain
                    );
                }
                Err(SpEigenError::NumericalFailure(msg)) => {
                    trace!(
                        "level {} iteration {}: extrapolated point failed ({}), using plain step",
                        ctx.level_index,
                        ctx.iteration,
                        msg
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Advance {
            point: x2,
            objective: plain,
            extrapolated: false,
        })
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Self::new(true)
    }
}
