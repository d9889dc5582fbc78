//! Particle filtering and orchestration modules.

pub mod calibrate;
pub mod filter;
pub mod pipeline;
pub mod pool;

// Re-export key types for convenience
pub use calibrate::{CalibrateError, Calibration, CalibrationPolicy, MedianPolicy, SignalAggregate};
pub use filter::{filter_file, filter_particles, FilterError, FilterResult};
pub use pipeline::{filter_files, two_pass_filter, PipelineError, RunOptions};
pub use pool::{FilterPool, PoolOutcome};
