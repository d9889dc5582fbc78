//! Derivation of missing calibration parameters from signal distributions.
//!
//! Two-pass filtering is a state machine: an **Exploring** pass collects
//! aggregate optical-signal distributions across every file, a transition
//! derives each missing [`FilterParams`] field from those distributions,
//! and the **Applying** pass re-filters the same file list with the
//! completed parameter set. The estimator is a pluggable
//! [`CalibrationPolicy`]; the shipped [`MedianPolicy`] uses exact medians,
//! which are deterministic for a given input distribution.

use rayon::prelude::*;
use thiserror::Error;

use crate::config::{FilterParams, ResolvedParams};
use crate::core::loaders::ParticleRecord;

/// Errors raised while deriving calibration parameters.
#[derive(Error, Debug)]
pub enum CalibrateError {
    #[error("cannot derive calibration parameters: no usable particles observed")]
    Underdetermined,

    #[error("exploratory pass failed on {failures} file(s)")]
    ExploreFailed { failures: usize },
}

/// Aggregate distributions of the optical signals the estimators need.
///
/// Holds per-particle samples of the D2 - D1 alignment difference and the
/// D/fsc_small ratios. Ratio samples are only collected where fsc_small is
/// nonzero.
#[derive(Debug, Default)]
pub struct SignalAggregate {
    diffs: Vec<f64>,
    ratio1: Vec<f64>,
    ratio2: Vec<f64>,
    particles: u64,
}

impl SignalAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregate from one file's records.
    pub fn from_records(records: &[ParticleRecord]) -> Self {
        let mut agg = Self::new();
        agg.absorb(records);
        agg
    }

    /// Fold a file's records into this aggregate.
    pub fn absorb(&mut self, records: &[ParticleRecord]) {
        self.particles += records.len() as u64;
        for r in records {
            self.diffs.push(r.d2_f() - r.d1_f());
            let fsc = r.fsc_small_f();
            if fsc > 0.0 {
                self.ratio1.push(r.d1_f() / fsc);
                self.ratio2.push(r.d2_f() / fsc);
            }
        }
    }

    /// Merge another aggregate into this one.
    pub fn merge(&mut self, other: SignalAggregate) {
        self.particles += other.particles;
        self.diffs.extend(other.diffs);
        self.ratio1.extend(other.ratio1);
        self.ratio2.extend(other.ratio2);
    }

    /// Total particles absorbed.
    pub fn particles(&self) -> u64 {
        self.particles
    }
}

/// Estimator turning aggregate distributions into a complete parameter set.
///
/// Implementations must be deterministic for a given distribution. Fields
/// already set in the base parameters are kept as given.
pub trait CalibrationPolicy: Send + Sync {
    fn derive(
        &self,
        base: &FilterParams,
        agg: &SignalAggregate,
    ) -> Result<ResolvedParams, CalibrateError>;
}

/// Median-based estimator: missing notches come from the median D/fsc_small
/// ratio, the missing origin from the median D2 - D1 difference.
pub struct MedianPolicy;

impl CalibrationPolicy for MedianPolicy {
    fn derive(
        &self,
        base: &FilterParams,
        agg: &SignalAggregate,
    ) -> Result<ResolvedParams, CalibrateError> {
        if agg.particles == 0 {
            return Err(CalibrateError::Underdetermined);
        }

        let notch1 = match base.notch1 {
            Some(v) => v,
            None => median(&agg.ratio1).ok_or(CalibrateError::Underdetermined)?,
        };
        let notch2 = match base.notch2 {
            Some(v) => v,
            None => median(&agg.ratio2).ok_or(CalibrateError::Underdetermined)?,
        };
        let origin = match base.origin {
            Some(v) => v,
            None => median(&agg.diffs).ok_or(CalibrateError::Underdetermined)?,
        };

        Ok(ResolvedParams {
            notch1,
            notch2,
            width: base.width,
            origin,
            offset: base.offset,
        })
    }
}

/// Exact median of a sample; `None` when the sample is empty.
///
/// Sorting is the dominant cost for cruise-scale aggregates, so it runs on
/// the rayon pool.
fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.par_sort_unstable_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// The two-pass filtering state machine.
///
/// `Exploring` holds the partially-specified base parameters; `advance`
/// performs the transition and `Applying` is terminal.
#[derive(Debug)]
pub enum Calibration {
    Exploring(FilterParams),
    Applying(ResolvedParams),
}

impl Calibration {
    /// Derive missing fields from the exploratory aggregate and move to
    /// `Applying`. Advancing a terminal state is a no-op.
    pub fn advance(
        self,
        agg: &SignalAggregate,
        policy: &dyn CalibrationPolicy,
    ) -> Result<Self, CalibrateError> {
        match self {
            Calibration::Exploring(base) => Ok(Calibration::Applying(policy.derive(&base, agg)?)),
            done @ Calibration::Applying(_) => Ok(done),
        }
    }

    /// The resolved parameter set, once in the Applying state.
    pub fn applied(&self) -> Option<ResolvedParams> {
        match self {
            Calibration::Applying(p) => Some(*p),
            Calibration::Exploring(_) => None,
        }
    }
}
