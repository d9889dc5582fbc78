//! Core data types and I/O operations.

pub mod loaders;
pub mod locator;
pub mod progress;
pub mod writers;

pub use loaders::{read_evt, ParticleRecord};
pub use locator::{locate, FileRef, FileSource, Source};
pub use progress::{ProgressReporter, RunSummary};
pub use writers::{write_opp, write_opp_file, WriteError};
