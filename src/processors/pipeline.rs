//! Orchestration of filtering runs across a file list.
//!
//! Results are persisted in completion order. Per-file failures are
//! contained: they are logged, recorded in the sink, counted in the
//! summary, and never abort the run. Errors touching shared state (the
//! sink, cruise-wide calibration) do abort.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{FilterParams, ResolvedParams};
use crate::core::locator::{FileRef, FileSource};
use crate::core::progress::{ProgressReporter, RunSummary};
use crate::core::writers::{self, WriteError};
use crate::db::{ResultSink, SinkError};

use super::calibrate::{
    CalibrateError, Calibration, CalibrationPolicy, MedianPolicy, SignalAggregate,
};
use super::filter::{filter_file, read_records};
use super::pool::{FilterPool, PoolOutcome};

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    OppWrite(#[from] WriteError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Knobs for one filtering run.
#[derive(Clone)]
pub struct RunOptions {
    /// Worker thread count.
    pub workers: usize,
    /// Progress reporting resolution in percent.
    pub resolution: f64,
    /// When set, also write focused records as binary OPP files below
    /// this directory.
    pub opp_dir: Option<PathBuf>,
    /// Abort two-pass calibration when any exploratory file fails.
    pub strict_explore: bool,
    /// Estimator for missing calibration parameters.
    pub policy: Arc<dyn CalibrationPolicy>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            resolution: 10.0,
            opp_dir: None,
            strict_explore: false,
            policy: Arc::new(MedianPolicy),
        }
    }
}

/// Filter every file in `files` against `params` and persist the results.
///
/// Unset parameter fields are derived per file from that file's own signal
/// distribution. The focused-particle total is independent of `workers`;
/// only completion order varies.
pub fn filter_files(
    files: &[FileRef],
    params: &FilterParams,
    source: Arc<dyn FileSource>,
    sink: &mut dyn ResultSink,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new();
    let mut progress = ProgressReporter::new(files.len(), opts.resolution);

    let params = *params;
    let policy = Arc::clone(&opts.policy);
    let pool = FilterPool::new(opts.workers);
    let rx = pool.run(files.to_vec(), move |file| {
        filter_file(source.as_ref(), file, &params, policy.as_ref()).map_err(|e| e.to_string())
    });

    for outcome in rx {
        match outcome {
            PoolOutcome::Done { file, value } => {
                if let Some(opp_dir) = &opts.opp_dir {
                    writers::write_opp_file(opp_dir, &file, &value.records)?;
                }
                sink.persist(&value)?;
                summary.record_success(value.total, value.focused);
            }
            PoolOutcome::Failed { file, error } => {
                log::warn!("skipping '{}': {}", file.key, error);
                sink.record_failure(&file, &error)?;
                summary.record_failure();
            }
        }
        progress.observe(summary.files);
    }

    sink.build_indexes()?;
    Ok(summary)
}

/// Two-pass filtering: derive cruise-wide calibration parameters from an
/// exploratory pass over every file, then filter with the completed set.
///
/// Both passes visit every file and complete before the next stage starts.
/// With `strict_explore` any exploratory failure aborts the run; otherwise
/// failed files are logged and excluded from the aggregate.
pub fn two_pass_filter(
    files: &[FileRef],
    params: &FilterParams,
    source: Arc<dyn FileSource>,
    sink: &mut dyn ResultSink,
    opts: &RunOptions,
) -> Result<RunSummary> {
    let resolved = explore(files, params, Arc::clone(&source), opts)?;
    log::info!(
        "derived calibration: notch1={:.4} notch2={:.4} origin={:.1}",
        resolved.notch1,
        resolved.notch2,
        resolved.origin
    );

    filter_files(files, &resolved.into(), source, sink, opts)
}

/// The exploratory pass: aggregate signal distributions and derive the
/// missing parameter fields.
fn explore(
    files: &[FileRef],
    params: &FilterParams,
    source: Arc<dyn FileSource>,
    opts: &RunOptions,
) -> Result<ResolvedParams> {
    // Parameters already complete, nothing to explore for.
    if let Some(resolved) = params.resolved() {
        return Ok(resolved);
    }

    log::info!("exploratory pass over {} files", files.len());
    let mut progress = ProgressReporter::new(files.len(), opts.resolution);
    let mut agg = SignalAggregate::new();
    let mut failures = 0usize;
    let mut seen = 0usize;

    let pool = FilterPool::new(opts.workers);
    let rx = pool.run(files.to_vec(), move |file| {
        read_records(source.as_ref(), file)
            .map(|records| SignalAggregate::from_records(&records))
            .map_err(|e| e.to_string())
    });

    for outcome in rx {
        match outcome {
            PoolOutcome::Done { value, .. } => agg.merge(value),
            PoolOutcome::Failed { file, error } => {
                log::warn!("exploration skipping '{}': {}", file.key, error);
                failures += 1;
            }
        }
        seen += 1;
        progress.observe(seen);
    }

    if failures > 0 && opts.strict_explore {
        return Err(CalibrateError::ExploreFailed { failures }.into());
    }

    let state = Calibration::Exploring(*params).advance(&agg, opts.policy.as_ref())?;
    match state.applied() {
        Some(resolved) => Ok(resolved),
        // advance() on Exploring either errors or lands in Applying.
        None => Err(CalibrateError::Underdetermined.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{tests::encode_evt, CHANNEL_COUNT};
    use crate::db::SqliteSink;
    use std::collections::HashMap;
    use std::io::Read;

    /// In-memory file source keyed by FileRef key.
    struct MapSource(HashMap<String, Vec<u8>>);

    impl FileSource for MapSource {
        fn open(&self, file: &FileRef) -> std::io::Result<Box<dyn Read + Send>> {
            match self.0.get(&file.key) {
                Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such key",
                )),
            }
        }
    }

    fn row(d1: u16, d2: u16, fsc: u16) -> [u16; CHANNEL_COUNT] {
        [0, 0, d1, d2, fsc, 0, 0, 0, 0, 0]
    }

    /// Three files, five particles each, calibrated so exactly 7 of the
    /// 15 particles pass.
    fn fixture() -> (Arc<MapSource>, Vec<FileRef>, FilterParams) {
        let mut map = HashMap::new();
        // File 0: 3 focused of 5.
        map.insert(
            "C1/0.evt".to_string(),
            encode_evt(&[
                row(10, 10, 1000),
                row(20, 20, 1000),
                row(30, 30, 1000),
                row(900, 900, 1000),
                row(950, 950, 1000),
            ]),
        );
        // File 1: 0 focused of 5.
        map.insert(
            "C1/1.evt".to_string(),
            encode_evt(&[
                row(900, 900, 1000),
                row(910, 910, 1000),
                row(920, 920, 1000),
                row(930, 930, 1000),
                row(940, 940, 1000),
            ]),
        );
        // File 2: 4 focused of 5.
        map.insert(
            "C1/2.evt".to_string(),
            encode_evt(&[
                row(10, 10, 1000),
                row(20, 20, 1000),
                row(30, 30, 1000),
                row(40, 40, 1000),
                row(990, 990, 1000),
            ]),
        );

        let files = (0..3)
            .map(|i| FileRef {
                key: format!("C1/{}.evt", i),
                cruise: "C1".to_string(),
                ordinal: i,
            })
            .collect();

        let params = FilterParams {
            notch1: Some(0.5),
            notch2: Some(0.5),
            width: 1.0,
            origin: Some(0.0),
            offset: 0.0,
        };
        (Arc::new(MapSource(map)), files, params)
    }

    #[test]
    fn test_filter_files_totals() {
        let (source, files, params) = fixture();
        let mut sink = SqliteSink::open_in_memory().unwrap();

        let summary = filter_files(
            &files,
            &params,
            source,
            &mut sink,
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.particles, 15);
        assert_eq!(summary.focused, 7);
        assert_eq!(sink.opp_count("C1").unwrap(), 7);
        assert_eq!(sink.focused_count("C1", "1.evt").unwrap(), Some(0));
    }

    #[test]
    fn test_mixed_file_sizes() {
        // Files of 10, 0 and 5 particles; the empty file is a valid result,
        // not an error.
        let mut map = HashMap::new();
        map.insert(
            "C1/0.evt".to_string(),
            encode_evt(&(0..10).map(|_| row(10, 10, 1000)).collect::<Vec<_>>()),
        );
        map.insert("C1/1.evt".to_string(), encode_evt(&[]));
        map.insert(
            "C1/2.evt".to_string(),
            encode_evt(&(0..5).map(|_| row(20, 20, 1000)).collect::<Vec<_>>()),
        );
        let files: Vec<FileRef> = (0..3)
            .map(|i| FileRef {
                key: format!("C1/{}.evt", i),
                cruise: "C1".to_string(),
                ordinal: i,
            })
            .collect();
        let params = FilterParams {
            notch1: Some(0.5),
            notch2: Some(0.5),
            width: 1.0,
            origin: Some(0.0),
            offset: 0.0,
        };

        let mut sink = SqliteSink::open_in_memory().unwrap();
        let opts = RunOptions {
            workers: 2,
            ..RunOptions::default()
        };
        let summary =
            filter_files(&files, &params, Arc::new(MapSource(map)), &mut sink, &opts).unwrap();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.particles, 15);
        assert_eq!(sink.focused_count("C1", "1.evt").unwrap(), Some(0));
    }

    #[test]
    fn test_totals_independent_of_worker_count() {
        let mut focused_counts = Vec::new();
        for workers in [1, 2, 4, 8] {
            let (source, files, params) = fixture();
            let mut sink = SqliteSink::open_in_memory().unwrap();
            let opts = RunOptions {
                workers,
                ..RunOptions::default()
            };
            let summary = filter_files(&files, &params, source, &mut sink, &opts).unwrap();
            focused_counts.push((summary.particles, summary.focused));
        }
        assert!(focused_counts.iter().all(|&c| c == (15, 7)));
    }

    #[test]
    fn test_missing_file_is_contained() {
        let (source, mut files, params) = fixture();
        files.push(FileRef {
            key: "C1/ghost.evt".to_string(),
            cruise: "C1".to_string(),
            ordinal: 3,
        });
        let mut sink = SqliteSink::open_in_memory().unwrap();

        let summary = filter_files(
            &files,
            &params,
            source,
            &mut sink,
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.files, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.focused, 7);
        // Failure is recorded in the sink alongside the successes.
        assert_eq!(sink.focused_count("C1", "ghost.evt").unwrap(), Some(0));
    }

    #[test]
    fn test_two_pass_derives_then_filters() {
        let (source, files, _) = fixture();
        let mut sink = SqliteSink::open_in_memory().unwrap();

        // Only the origin is given; notches come from the cruise medians.
        let params = FilterParams {
            origin: Some(0.0),
            ..FilterParams::default()
        };
        let summary = two_pass_filter(
            &files,
            &params,
            source,
            &mut sink,
            &RunOptions::default(),
        )
        .unwrap();

        // Median d/fsc ratio across all 15 particles is 0.9; exactly the
        // nine particles at or below that ratio pass.
        assert_eq!(summary.particles, 15);
        assert_eq!(summary.focused, 9);
    }

    /// Ignores the data and always answers with the same parameter set.
    struct FixedPolicy(ResolvedParams);

    impl CalibrationPolicy for FixedPolicy {
        fn derive(
            &self,
            _base: &FilterParams,
            _agg: &SignalAggregate,
        ) -> std::result::Result<ResolvedParams, CalibrateError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_custom_policy_drives_both_passes() {
        let (source, files, _) = fixture();
        let mut sink = SqliteSink::open_in_memory().unwrap();

        // The median estimator would settle on notch 0.9 here (9 focused);
        // the fixed policy pins notch 0.5 instead, which passes 7.
        let opts = RunOptions {
            policy: Arc::new(FixedPolicy(ResolvedParams {
                notch1: 0.5,
                notch2: 0.5,
                width: 1.0,
                origin: 0.0,
                offset: 0.0,
            })),
            ..RunOptions::default()
        };
        let summary = two_pass_filter(
            &files,
            &FilterParams::default(),
            source,
            &mut sink,
            &opts,
        )
        .unwrap();

        assert_eq!(summary.particles, 15);
        assert_eq!(summary.focused, 7);
    }

    #[test]
    fn test_two_pass_underdetermined() {
        let map = HashMap::from([("C1/0.evt".to_string(), encode_evt(&[]))]);
        let files = vec![FileRef {
            key: "C1/0.evt".to_string(),
            cruise: "C1".to_string(),
            ordinal: 0,
        }];
        let mut sink = SqliteSink::open_in_memory().unwrap();

        let result = two_pass_filter(
            &files,
            &FilterParams::default(),
            Arc::new(MapSource(map)),
            &mut sink,
            &RunOptions::default(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Calibrate(CalibrateError::Underdetermined))
        ));
    }

    #[test]
    fn test_strict_explore_aborts_on_failure() {
        let (source, mut files, _) = fixture();
        files.push(FileRef {
            key: "C1/ghost.evt".to_string(),
            cruise: "C1".to_string(),
            ordinal: 3,
        });
        let mut sink = SqliteSink::open_in_memory().unwrap();

        let opts = RunOptions {
            strict_explore: true,
            ..RunOptions::default()
        };
        let result = two_pass_filter(
            &files,
            &FilterParams::default(),
            source,
            &mut sink,
            &opts,
        );
        assert!(matches!(
            result,
            Err(PipelineError::Calibrate(CalibrateError::ExploreFailed { failures: 1 }))
        ));
    }

    #[test]
    fn test_two_pass_rerun_converges() {
        let (source, files, _) = fixture();
        let mut sink = SqliteSink::open_in_memory().unwrap();
        let params = FilterParams {
            origin: Some(0.0),
            ..FilterParams::default()
        };

        let first = two_pass_filter(
            &files,
            &params,
            Arc::clone(&source) as Arc<dyn FileSource>,
            &mut sink,
            &RunOptions::default(),
        )
        .unwrap();
        let second = two_pass_filter(
            &files,
            &params,
            source,
            &mut sink,
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(first.focused, second.focused);
        // Rows are replaced, not accumulated.
        assert_eq!(sink.opp_count("C1").unwrap(), second.focused);
    }

    #[test]
    fn test_opp_dir_output() {
        let (source, files, params) = fixture();
        let mut sink = SqliteSink::open_in_memory().unwrap();
        let dir = tempfile::TempDir::new().unwrap();

        let opts = RunOptions {
            opp_dir: Some(dir.path().to_path_buf()),
            ..RunOptions::default()
        };
        filter_files(&files, &params, source, &mut sink, &opts).unwrap();

        // Output names keep the source name with .opp appended.
        for i in 0..3 {
            assert!(dir.path().join("C1").join(format!("{}.evt.opp", i)).exists());
        }
    }
}
