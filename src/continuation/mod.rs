use log::{debug, trace, warn};

use crate::accel::{Accelerator, IterationContext, MajorizationStep};
use crate::convergence::{ConvergenceMonitor, LevelReport, Status};
use crate::error::{Result, SpEigenError};
use crate::surrogate::SmoothingLevel;

const DEFAULT_LEVELS: usize = 11;
const DEFAULT_FIRST_EXPONENT: f64 = 1.0;
const DEFAULT_LAST_EXPONENT: f64 = 7.0;

/// Strictly decreasing sequence of `(p, ε)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingSchedule {
    levels: Vec<SmoothingLevel>,
}

impl SmoothingSchedule {
    /// `steps` levels with `p_t = ε_t = 10^(−e_t)`, where the exponents
    /// `e_t` grow geometrically from `first_exponent` to `last_exponent`.
    pub fn geometric(first_exponent: f64, last_exponent: f64, steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(SpEigenError::invalid("smoothing schedule needs at least one level"));
        }
        if !(first_exponent.is_finite() && first_exponent > 0.0) {
            return Err(SpEigenError::invalid(format!(
                "first schedule exponent must be positive, got {}",
                first_exponent
            )));
        }
        if !(last_exponent.is_finite() && (last_exponent > first_exponent || steps == 1)) {
            return Err(SpEigenError::invalid(format!(
                "last schedule exponent must exceed the first ({} <= {})",
                last_exponent, first_exponent
            )));
        }

        let p: Vec<f64> = geometric_exponents(first_exponent, last_exponent, steps)
            .map(|e| 10f64.powf(-e))
            .collect();
        Self::from_pairs(&p, &p)
    }

    /// Explicit `p` and `ε` sequences, both strictly decreasing and positive.
    pub fn from_pairs(p: &[f64], eps: &[f64]) -> Result<Self> {
        if p.is_empty() {
            return Err(SpEigenError::invalid("smoothing schedule needs at least one level"));
        }
        if p.len() != eps.len() {
            return Err(SpEigenError::invalid(format!(
                "p and eps schedules differ in length ({} vs {})",
                p.len(),
                eps.len()
            )));
        }
        let decreasing = |s: &[f64]| s.windows(2).all(|w| w[1] < w[0]);
        if !decreasing(p) || !decreasing(eps) {
            return Err(SpEigenError::invalid(
                "smoothing schedule must be strictly decreasing",
            ));
        }

        let levels = p
            .iter()
            .zip(eps)
            .map(|(&p, &eps)| SmoothingLevel::new(p, eps))
            .collect::<Result<Vec<_>>>()?;
        Ok(SmoothingSchedule { levels })
    }

    pub fn levels(&self) -> &[SmoothingLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The last and smallest pair, whose solution is reported.
    pub fn tightest(&self) -> SmoothingLevel {
        self.levels[self.levels.len() - 1]
    }
}

impl Default for SmoothingSchedule {
    fn default() -> Self {
        Self::geometric(DEFAULT_FIRST_EXPONENT, DEFAULT_LAST_EXPONENT, DEFAULT_LEVELS)
            .expect("Default smoothing constants form a valid schedule")
    }
}

fn geometric_exponents(first: f64, last: f64, steps: usize) -> impl Iterator<Item = f64> {
    let ratio = if steps > 1 {
        (last / first).powf(1.0 / (steps - 1) as f64)
    } else {
        1.0
    };
    (0..steps).map(move |t| {
        if t + 1 == steps {
            last
        } else {
            first * ratio.powi(t as i32)
        }
    })
}

/// Final point of a continuation run with one report per level.
#[derive(Debug, Clone)]
pub struct ContinuationOutcome<P> {
    pub point: P,
    pub reports: Vec<LevelReport>,
}

impl<P> ContinuationOutcome<P> {
    /// Inner iterations summed over all levels.
    pub fn iterations(&self) -> usize {
        self.reports.iter().map(|r| r.iterations).sum()
    }

    /// Whether the tightest level met the tolerance.
    pub fn converged(&self) -> bool {
        self.reports.last().is_some_and(|r| r.converged)
    }
}

/// Tightens the cardinality surrogate level by level, warm-starting each
/// level from the previous level's final point.
pub struct ContinuationScheduler<'a> {
    schedule: &'a SmoothingSchedule,
    accelerator: Accelerator,
    tolerance: f64,
    max_iter: usize,
}

impl<'a> ContinuationScheduler<'a> {
    pub fn new(
        schedule: &'a SmoothingSchedule,
        accelerated: bool,
        tolerance: f64,
        max_iter: usize,
    ) -> Result<Self> {
        // Validates the stopping rule once, before any level runs.
        ConvergenceMonitor::new(tolerance, max_iter)?;
        if schedule.is_empty() {
            return Err(SpEigenError::invalid("smoothing schedule needs at least one level"));
        }
        Ok(ContinuationScheduler {
            schedule,
            accelerator: Accelerator::new(accelerated),
            tolerance,
            max_iter,
        })
    }

    pub fn run<M: MajorizationStep>(
        &self,
        map: &M,
        start: M::Point,
    ) -> Result<ContinuationOutcome<M::Point>> {
        let total = self.schedule.len();
        let mut point = start;
        let mut reports = Vec::with_capacity(total);

        for (t, &level) in self.schedule.levels().iter().enumerate() {
            let mut monitor = ConvergenceMonitor::new(self.tolerance, self.max_iter)?;
            let mut ctx = IterationContext::new(level, t);

            let (converged, objective) = loop {
                let advance = self.accelerator.advance(map, &point, &ctx)?;
                let change = map.change(&point, &advance.point);
                point = advance.point;
                ctx.iteration += 1;

                trace!(
                    "level {}/{} iteration {}: objective = {:.10e}, change = {:.3e}, extrapolated = {}",
                    t + 1,
                    total,
                    ctx.iteration,
                    advance.objective,
                    change,
                    advance.extrapolated
                );

                match monitor.observe(change)? {
                    Status::Continue => {}
                    Status::Converged => break (true, advance.objective),
                    Status::Exhausted => break (false, advance.objective),
                }
            };

            if !converged {
                warn!(
                    "Smoothing level {}/{} (p = {:.1e}) hit the iteration cap of {} (last change {:.3e})",
                    t + 1,
                    total,
                    level.p(),
                    self.max_iter,
                    monitor.last_change()
                );
            }
            debug!(
                "Smoothing level {}/{}: p = {:.1e}, eps = {:.1e}, {} iterations, final change {:.3e}",
                t + 1,
                total,
                level.p(),
                level.eps(),
                monitor.iterations(),
                monitor.last_change()
            );

            reports.push(monitor.report(level, converged, objective));
        }

        Ok(ContinuationOutcome { point, reports })
    }
}
