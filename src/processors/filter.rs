//! Classification of particles as optically focused (OPP).
//!
//! A particle passes two checks, all arithmetic in double precision:
//!
//! 1. **Alignment**: the D1/D2 detector pair must sit inside the envelope
//!    `d1 < d2 + origin + width * SCALE` and `d2 < d1 - origin + width * SCALE`,
//!    i.e. the D2 - D1 difference lies within `width` scale units of `origin`.
//! 2. **Focus**: each detector signal, adjusted by `offset`, must not exceed
//!    its notch ratio against the small forward-scatter channel:
//!    `(d + offset) <= notch * fsc_small`.

use thiserror::Error;

use crate::config::{FilterParams, ResolvedParams};
use crate::core::loaders::{self, LoaderError, ParticleRecord};
use crate::core::locator::{FileRef, FileSource};

use super::calibrate::{CalibrateError, CalibrationPolicy, SignalAggregate};

/// Signal units covered by one unit of `width`. Channel values span the
/// full u16 range, so width 1.0 accepts a D2 - D1 spread of +/- 10000.
const WIDTH_SCALE: f64 = 10_000.0;

/// Errors that can occur while filtering one file.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("failed to open '{key}': {source}")]
    Open {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{key}': {source}")]
    Parse {
        key: String,
        #[source]
        source: LoaderError,
    },
}

/// Per-file classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub file: FileRef,
    /// Particles read from the file.
    pub total: u64,
    /// Particles classified as focused.
    pub focused: u64,
    /// The focused records themselves.
    pub records: Vec<ParticleRecord>,
    /// Calibration actually used for this file.
    pub params: FilterParams,
}

/// True when a single particle falls inside the acceptance envelope.
#[inline]
fn is_focused(r: &ParticleRecord, p: &ResolvedParams) -> bool {
    let d1 = r.d1_f();
    let d2 = r.d2_f();
    let fsc = r.fsc_small_f();
    let envelope = p.width * WIDTH_SCALE;

    let aligned = d1 < d2 + p.origin + envelope && d2 < d1 - p.origin + envelope;
    aligned && (d1 + p.offset) <= p.notch1 * fsc && (d2 + p.offset) <= p.notch2 * fsc
}

/// Classify records against a fully-resolved parameter set.
///
/// Pure function: same records and parameters always give the same subset.
pub fn filter_particles(records: &[ParticleRecord], params: &ResolvedParams) -> Vec<ParticleRecord> {
    records
        .iter()
        .filter(|r| is_focused(r, params))
        .copied()
        .collect()
}

/// Read one file's records through a [`FileSource`].
pub fn read_records(
    source: &dyn FileSource,
    file: &FileRef,
) -> Result<Vec<ParticleRecord>, FilterError> {
    let reader = source.open(file).map_err(|e| FilterError::Open {
        key: file.key.clone(),
        source: e,
    })?;
    loaders::read_evt_key(&file.key, reader).map_err(|e| FilterError::Parse {
        key: file.key.clone(),
        source: e,
    })
}

/// Filter one file.
///
/// When the parameter set still has unset fields they are derived from
/// this file's own signal distribution through `policy` (one-pass
/// behavior); two-pass mode hands in an already-resolved set. A file whose
/// parameters cannot be derived because it holds no usable particles
/// yields an empty result rather than an error.
pub fn filter_file(
    source: &dyn FileSource,
    file: &FileRef,
    params: &FilterParams,
    policy: &dyn CalibrationPolicy,
) -> Result<FilterResult, FilterError> {
    let records = read_records(source, file)?;
    let total = records.len() as u64;

    let resolved = match params.resolved() {
        Some(r) => Some(r),
        None => {
            let agg = SignalAggregate::from_records(&records);
            match policy.derive(params, &agg) {
                Ok(r) => Some(r),
                Err(CalibrateError::Underdetermined) => None,
                Err(CalibrateError::ExploreFailed { .. }) => None,
            }
        }
    };

    let (focused_records, used) = match resolved {
        Some(r) => (filter_particles(&records, &r), r.into()),
        None => (Vec::new(), *params),
    };

    Ok(FilterResult {
        file: file.clone(),
        total,
        focused: focused_records.len() as u64,
        records: focused_records,
        params: used,
    })
}
